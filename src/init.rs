use crate::{
    consts::{args, commands, tokens, BLOCK_SIZE_U32},
    response::{R1Response, R7Payload},
    transport::Transport,
    Error, ErrorFor, SdCard, SdCardConfig, Status, StatusFlag,
};

use embedded_hal::blocking::delay::DelayMs;

/// Initialization step, run strictly in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitStep {
    /// Clock idle bytes with the card deselected.
    BusReset,
    /// GO_IDLE_STATE, the card must answer "in idle state".
    GoIdle,
    /// SEND_IF_COND, R7 payload drained when the card knows the command.
    CheckInterfaceCondition,
    /// APP_CMD + SD_SEND_OP_COMD until the card leaves the idle state.
    ApplicationInit,
    /// SET_BLOCKLEN to 512 bytes.
    SetBlockLength,
    /// Capacity taken from the config.
    CapacityFixed,
}

impl InitStep {
    /// Step that follows `self`, `None` after the last one.
    pub fn next(self) -> Option<InitStep> {
        match self {
            InitStep::BusReset => Some(InitStep::GoIdle),
            InitStep::GoIdle => Some(InitStep::CheckInterfaceCondition),
            InitStep::CheckInterfaceCondition => Some(InitStep::ApplicationInit),
            InitStep::ApplicationInit => Some(InitStep::SetBlockLength),
            InitStep::SetBlockLength => Some(InitStep::CapacityFixed),
            InitStep::CapacityFixed => None,
        }
    }
}

impl<T: Transport, D: DelayMs<u8>, Config: SdCardConfig> SdCard<T, D, Config>
where
    T::Error: core::fmt::Debug,
{
    /// Clock the card with CS high so it can synchronize.
    fn bus_reset(&self) -> Result<(), ErrorFor<T>> {
        self.deselect()?;

        for _ in 0..Config::IDLE_CLOCK_BYTES {
            self.send(tokens::IDLE)?;
        }

        Ok(())
    }

    /// Enter SD to SPI mode.
    fn go_idle(&self) -> Result<(), ErrorFor<T>> {
        let r1 = self.cs_scope(|s| s.send_command(commands::CMD0, 0x0000_0000))?;

        if r1 != R1Response::IN_IDLE_STATE {
            error!("CMD0 failed: 0x{:02X}", r1.0);
            return Err(Error::InitFailure {
                step: InitStep::GoIdle,
                response: r1.0,
            });
        }

        Ok(())
    }

    /// Verify SD Memory Card interface operating condition.
    fn check_interface_condition(&self) -> Result<(), ErrorFor<T>> {
        self.cs_scope(|s| {
            let r1 = s.send_command(commands::CMD8, args::IF_COND_3V3)?;

            if r1 == R1Response::IN_IDLE_STATE {
                let mut r7: R7Payload = Default::default();
                s.receive_slice(&mut r7)?;

                debug!(
                    "CMD8 response: {:02X} {:02X} {:02X} {:02X}",
                    r7[0], r7[1], r7[2], r7[3]
                );
                if r7[3] != args::IF_COND_CHECK_PATTERN {
                    warn!("CMD8 check pattern mismatch: 0x{:02X}", r7[3]);
                }
            } else {
                debug!("CMD8 not supported: 0x{:02X}", r1.0);
            }

            Ok(())
        })
    }

    /// Sends host capacity support information until the card leaves the idle state.
    ///
    /// A round without any R1 ends the loop at once.
    fn application_init(&self) -> Result<(), ErrorFor<T>> {
        let mut r1 = R1Response(tokens::IDLE);

        for _ in 0..Config::INIT_ATTEMPTS {
            r1 = self.cs_scope(|s| s.send_command(commands::ACMD41, args::OP_COND_HCS))?;

            if r1 == R1Response::READY_STATE {
                return Ok(());
            }
            if !r1.is_valid() {
                error!("No response from ACMD41");
                return Err(Error::TimeoutCommand(commands::ACMD41 & !commands::ACMD_FLAG));
            }

            self.delay_ms(Config::INIT_RETRY_DELAY_MS);
        }

        error!("ACMD41 failed: 0x{:02X}", r1.0);
        Err(Error::InitFailure {
            step: InitStep::ApplicationInit,
            response: r1.0,
        })
    }

    /// Set block size to 512 bytes.
    fn set_block_length(&self) -> Result<(), ErrorFor<T>> {
        let r1 = self.cs_scope(|s| s.send_command(commands::CMD16, BLOCK_SIZE_U32))?;

        if r1 != R1Response::READY_STATE {
            error!("CMD16 failed: 0x{:02X}", r1.0);
            return Err(Error::InitFailure {
                step: InitStep::SetBlockLength,
                response: r1.0,
            });
        }

        Ok(())
    }

    /// Run one initialization step.
    fn run_step(&mut self, step: InitStep) -> Result<(), ErrorFor<T>> {
        match step {
            InitStep::BusReset => self.bus_reset(),
            InitStep::GoIdle => self.go_idle(),
            InitStep::CheckInterfaceCondition => self.check_interface_condition(),
            InitStep::ApplicationInit => self.application_init(),
            InitStep::SetBlockLength => self.set_block_length(),
            InitStep::CapacityFixed => {
                // TODO: read the CSD register once cards of other sizes need to be supported.
                self.sector_count = Config::SECTOR_COUNT;
                Ok(())
            }
        }
    }

    /// Initialize SD.
    pub(crate) fn init(&mut self) -> Result<(), ErrorFor<T>> {
        info!("SD initialize started");

        self.status = StatusFlag::NotInitialized.into();
        self.sector_count = 0;

        let mut step = Some(InitStep::BusReset);
        let mut result = Ok(());
        while let Some(current) = step {
            info!("SD init step: {}", current);

            result = self.run_step(current);
            if result.is_err() {
                break;
            }
            step = current.next();
        }

        self.status = match &result {
            Ok(_) => {
                info!(
                    "SD successfully initialized, sectors: {}, capacity: {}",
                    self.sector_count,
                    debug2format!(self.capacity())
                );
                Status::default()
            }
            Err(err) => {
                error!("Failed to initialize SD: {}", debug2format!(err));
                self.sector_count = 0;
                StatusFlag::ErrorOccured | StatusFlag::NotInitialized
            }
        };

        result
    }
}
