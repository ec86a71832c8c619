//! SPI register transport.
//!
//! Every access is one chip-select frame of two bytes: the command byte
//! `(address << 1) | R/W` followed by the data byte. For a read the device
//! shifts the register out during the second byte.

#[cfg(not(feature = "async"))]
use embedded_hal::spi::SpiDevice;
#[cfg(feature = "async")]
use embedded_hal_async::spi::SpiDevice;

use crate::registers::Register;
use crate::RegisterAccess;

const READ: u8 = 0x01;
const WRITE: u8 = 0x00;

/// `RegisterAccess` over an `SpiDevice`, which owns chip select.
pub struct SpiInterface<SPI> {
    spi: SPI,
}

impl<SPI> SpiInterface<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    pub fn release(self) -> SPI {
        self.spi
    }

    /// Command byte for an access to `reg`.
    pub fn command(reg: Register, read: bool) -> u8 {
        (reg.address() << 1) | if read { READ } else { WRITE }
    }
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "SpiInterface",),
    async(feature = "async", keep_self)
)]
impl<SPI> RegisterAccess for SpiInterface<SPI>
where
    SPI: SpiDevice,
{
    type Error = SPI::Error;

    async fn read_register(&mut self, reg: Register) -> Result<u8, Self::Error> {
        let mut frame = [Self::command(reg, true), 0x00];
        self.spi.transfer_in_place(&mut frame).await?;
        Ok(frame[1])
    }

    async fn write_register(&mut self, reg: Register, value: u8) -> Result<(), Self::Error> {
        self.spi.write(&[Self::command(reg, false), value]).await
    }
}
