//! Device handle: open, configuration channel and acquisition lifecycle.
//!
//! [`DeviceHandle`] is what an application holds. It reads the device's
//! system information at open, routes `config_set`/`config_get` either to
//! host-side settings or to the register transport, and owns the consumer side
//! of the data exchange. [`DeviceHandle::data_start`] returns an
//! [`Acquisition`], the producer side, which the USB layer feeds from its own
//! thread through [`Acquisition::on_bytes`].

use crate::chip::{self, ChipId, ChipProfile};
use crate::config::*;
use crate::container::{ContainerStats, EventPacketContainer};
use crate::decoder::{DeviceFamily, FamilyKind, Translator};
use crate::device_log;
use crate::exchange::{DataExchange, ExchangeReceiver, ExchangeSender, Notifications, RunFlag};
use crate::log::{Diagnostics, LogLevel};
use crate::packet::PacketError;
use crate::ringbuffer::RingBufferError;
use crate::transport::{RegisterTransport, SysInfo, TransportError, WriteDone};
use crate::types::ColorFilter;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Register access failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Ring buffer allocation failed: {0}")]
    RingBuffer(#[from] RingBufferError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown chip identifier: {0}")]
    UnknownChip(u32),

    #[error("Chip {chip} belongs to the {expected} family, not {requested}")]
    FamilyMismatch {
        chip: ChipId,
        expected: FamilyKind,
        requested: &'static str,
    },

    #[error("Data acquisition is already running")]
    AlreadyRunning,

    #[error("Data acquisition is not running")]
    NotRunning,
}

/// What the device reported about itself at open.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub device_id: i16,
    /// Human-readable description, e.g. `DAVIS346 ID-1`.
    pub device_string: String,
    pub chip_id: ChipId,
    pub profile: Arc<dyn ChipProfile>,
    pub logic_version: u32,
    pub is_master: bool,
    /// Output geometry as (width, height).
    pub dvs_size: (u16, u16),
    pub dvs_orientation: u32,
    pub aps_size: (u16, u16),
    pub aps_orientation: u32,
    pub color_filter: ColorFilter,
    pub aps_has_reset_read: bool,
    pub imu_orientation: u32,
}

impl DeviceInfo {
    pub fn from_sysinfo(device_id: i16, sysinfo: &SysInfo, profile: Arc<dyn ChipProfile>) -> Self {
        let chip_id = profile.chip_id();
        Self {
            device_id,
            device_string: format!("{} ID-{}", chip_id.name().to_ascii_uppercase(), device_id),
            chip_id,
            profile,
            logic_version: sysinfo.logic_version,
            is_master: sysinfo.device_is_master,
            dvs_size: sysinfo.dvs_size,
            dvs_orientation: sysinfo.dvs_orientation,
            aps_size: sysinfo.aps_size,
            aps_orientation: sysinfo.aps_orientation,
            color_filter: ColorFilter::from_register(sysinfo.aps_color_filter),
            aps_has_reset_read: sysinfo.aps_has_reset_read,
            imu_orientation: sysinfo.imu_orientation,
        }
    }
}

/// Reads the system-information block. Only the chip identifier is
/// mandatory; everything else falls back to the chip's profile.
pub fn read_sysinfo(
    transport: &dyn RegisterTransport,
) -> Result<(SysInfo, Arc<dyn ChipProfile>), DeviceError> {
    let chip_identifier = transport.read(MODULE_SYSINFO, SYSINFO_CHIP_IDENTIFIER)?;
    let chip = ChipId::from_register(chip_identifier).ok_or(DeviceError::UnknownChip(chip_identifier))?;
    let profile = chip::profile(chip);

    let read_or = |module: i8, param: u8, default: u32| transport.read(module, param).unwrap_or(default);
    // Out-of-range sizes count as unreadable.
    let read_u16_or = |module: i8, param: u8, default: u16| {
        u16::try_from(read_or(module, param, u32::from(default))).unwrap_or(default)
    };
    let size = |module: i8, columns: u8, rows: u8, default: (u16, u16)| {
        (
            read_u16_or(module, columns, default.0),
            read_u16_or(module, rows, default.1),
        )
    };

    let sysinfo = SysInfo {
        chip_identifier,
        logic_version: read_or(MODULE_SYSINFO, SYSINFO_LOGIC_VERSION, 0),
        device_is_master: read_or(MODULE_SYSINFO, SYSINFO_DEVICE_IS_MASTER, 1) != 0,
        dvs_size: size(MODULE_DVS, DVS_SIZE_COLUMNS, DVS_SIZE_ROWS, profile.dvs_size()),
        dvs_orientation: read_or(MODULE_DVS, DVS_ORIENTATION_INFO, 0),
        aps_size: size(MODULE_APS, APS_SIZE_COLUMNS, APS_SIZE_ROWS, profile.aps_size()),
        aps_orientation: read_or(MODULE_APS, APS_ORIENTATION_INFO, 0),
        aps_color_filter: read_or(MODULE_APS, APS_COLOR_FILTER, profile.color_filter() as u32),
        aps_has_reset_read: read_or(MODULE_APS, APS_RESET_READ, 1) != 0,
        imu_orientation: read_or(MODULE_IMU, IMU_ORIENTATION_INFO, 0),
    };
    Ok((sysinfo, profile))
}

fn invalid(module: i8, param: u8, value: u32, reason: &'static str) -> DeviceError {
    DeviceError::Config(ConfigError::InvalidValue {
        module,
        param,
        value,
        reason,
    })
}

fn unknown(module: i8, param: u8) -> DeviceError {
    DeviceError::Config(ConfigError::UnknownParameter { module, param })
}

/// An open device of family `F`.
pub struct DeviceHandle<F> {
    info: DeviceInfo,
    transport: Arc<dyn RegisterTransport>,
    settings: Arc<AcquisitionSettings>,
    diag: Arc<Diagnostics>,
    exchange: DataExchange,
    running: RunFlag,
    receiver: Option<ExchangeReceiver>,
    _family: PhantomData<fn() -> F>,
}

impl<F: DeviceFamily> DeviceHandle<F> {
    pub fn open(
        device_id: i16,
        transport: Arc<dyn RegisterTransport>,
        config: &AcquisitionConfig,
    ) -> Result<Self, DeviceError> {
        let config = config.clone().validated()?;

        let (sysinfo, profile) = read_sysinfo(transport.as_ref())?;
        let chip = profile.chip_id();
        let expected = FamilyKind::from_chip(chip);
        if expected.name() != F::NAME {
            return Err(DeviceError::FamilyMismatch {
                chip,
                expected,
                requested: F::NAME,
            });
        }

        let info = DeviceInfo::from_sysinfo(device_id, &sysinfo, profile);
        let diag = Arc::new(Diagnostics::new(info.device_string.clone(), config.log_level));
        let settings = Arc::new(AcquisitionSettings::new(&config));

        if let Ok(exposure) = transport.read(MODULE_APS, APS_EXPOSURE) {
            settings.set_last_exposure(exposure);
        }

        device_log!(
            diag,
            Info,
            "Initialized device successfully with chip {}, logic version {}.",
            chip,
            info.logic_version
        );

        Ok(Self {
            info,
            transport,
            exchange: DataExchange::new(Arc::clone(&settings)),
            settings,
            diag,
            running: RunFlag::new(),
            receiver: None,
            _family: PhantomData,
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diag
    }

    pub fn settings(&self) -> &Arc<AcquisitionSettings> {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// Installs consumer notification callbacks, used from the next data-start.
    pub fn set_notifications(&mut self, notifications: Notifications) {
        self.exchange.set_notifications(notifications);
    }

    /// Sets a host-side setting or writes a device register.
    pub fn config_set(&self, module: i8, param: u8, value: u32) -> Result<(), DeviceError> {
        let s = &self.settings;
        match (module, param) {
            (HOST_USB, USB_BUFFER_NUMBER) => {
                if value == 0 {
                    return Err(invalid(module, param, value, "must be at least 1"));
                }
                s.set_usb_buffer_number(value);
            }
            (HOST_USB, USB_BUFFER_SIZE) => s.set_usb_buffer_size(value),

            (HOST_DATAEXCHANGE, DATAEXCHANGE_BUFFER_SIZE) => {
                if !value.is_power_of_two() {
                    return Err(invalid(module, param, value, "must be a power of two"));
                }
                s.set_ring_size(value);
            }
            (HOST_DATAEXCHANGE, DATAEXCHANGE_BLOCKING) => s.set_blocking(value != 0),
            (HOST_DATAEXCHANGE, DATAEXCHANGE_START_PRODUCERS) => s.set_start_producers(value != 0),
            (HOST_DATAEXCHANGE, DATAEXCHANGE_STOP_PRODUCERS) => s.set_stop_producers(value != 0),

            (HOST_PACKETS, PACKETS_MAX_CONTAINER_PACKET_SIZE) => s.set_max_packet_size(value),
            (HOST_PACKETS, PACKETS_MAX_CONTAINER_INTERVAL) => {
                if value == 0 {
                    return Err(invalid(module, param, value, "must be at least 1"));
                }
                s.set_max_interval(value);
            }

            (HOST_LOG, LOG_LEVEL) => {
                if value > LogLevel::Debug as u32 {
                    return Err(invalid(module, param, value, "must be 0-7"));
                }
                self.diag.set_level(LogLevel::from_u8(value as u8));
            }

            (MODULE_APS, APS_AUTOEXPOSURE) => s.set_auto_exposure(value != 0),
            (MODULE_APS, APS_EXPOSURE) => {
                self.transport.write(module, param, value)?;
                s.set_last_exposure(value);
            }

            _ if module < 0 => return Err(unknown(module, param)),
            _ => self.transport.write(module, param, value)?,
        }
        Ok(())
    }

    /// Reads a host-side setting or a device register.
    pub fn config_get(&self, module: i8, param: u8) -> Result<u32, DeviceError> {
        let s = &self.settings;
        let value = match (module, param) {
            (HOST_USB, USB_BUFFER_NUMBER) => s.usb_buffer_number(),
            (HOST_USB, USB_BUFFER_SIZE) => s.usb_buffer_size(),
            (HOST_DATAEXCHANGE, DATAEXCHANGE_BUFFER_SIZE) => s.ring_size(),
            (HOST_DATAEXCHANGE, DATAEXCHANGE_BLOCKING) => u32::from(s.blocking()),
            (HOST_DATAEXCHANGE, DATAEXCHANGE_START_PRODUCERS) => u32::from(s.start_producers()),
            (HOST_DATAEXCHANGE, DATAEXCHANGE_STOP_PRODUCERS) => u32::from(s.stop_producers()),
            (HOST_PACKETS, PACKETS_MAX_CONTAINER_PACKET_SIZE) => s.max_packet_size(),
            (HOST_PACKETS, PACKETS_MAX_CONTAINER_INTERVAL) => s.max_interval(),
            (HOST_LOG, LOG_LEVEL) => self.diag.level() as u32,
            (MODULE_APS, APS_AUTOEXPOSURE) => u32::from(s.auto_exposure()),
            _ if module < 0 => return Err(unknown(module, param)),
            _ => self.transport.read(module, param)?,
        };
        Ok(value)
    }

    /// Pushes a whole configuration through the configuration channel.
    pub fn apply_config(&self, config: &AcquisitionConfig) -> Result<(), DeviceError> {
        let config = config.clone().validated()?;
        self.config_set(HOST_USB, USB_BUFFER_NUMBER, config.usb_buffer_number)?;
        self.config_set(HOST_USB, USB_BUFFER_SIZE, config.usb_buffer_size)?;
        self.config_set(HOST_DATAEXCHANGE, DATAEXCHANGE_BUFFER_SIZE, config.ring_buffer_size)?;
        self.config_set(HOST_DATAEXCHANGE, DATAEXCHANGE_BLOCKING, u32::from(config.blocking))?;
        self.config_set(HOST_PACKETS, PACKETS_MAX_CONTAINER_PACKET_SIZE, config.max_packet_size)?;
        self.config_set(HOST_PACKETS, PACKETS_MAX_CONTAINER_INTERVAL, config.max_interval_us)?;
        self.config_set(HOST_LOG, LOG_LEVEL, config.log_level as u32)?;
        self.config_set(MODULE_APS, APS_AUTOEXPOSURE, u32::from(config.auto_exposure))?;
        Ok(())
    }

    /// Run registers of the producers this device has, in start order.
    fn producer_registers(&self) -> Vec<(i8, u8)> {
        let mut registers = vec![(MODULE_MUX, MUX_RUN), (MODULE_MUX, MUX_TIMESTAMP_RUN)];
        if self.info.dvs_size != (0, 0) {
            registers.push((MODULE_DVS, DVS_RUN));
        }
        if self.info.aps_size != (0, 0) {
            registers.push((MODULE_APS, APS_RUN));
        }
        if self.info.profile.has_imu() {
            registers.push((MODULE_IMU, IMU_RUN));
        }
        registers
    }

    /// Allocates a fresh exchange and returns the producer side of the run.
    pub fn data_start(&mut self) -> Result<Acquisition<F>, DeviceError> {
        if self.running.is_running() {
            return Err(DeviceError::AlreadyRunning);
        }

        let (sender, receiver) = self.exchange.start(self.running.clone())?;
        let translator = Translator::new(
            F::open(&self.info),
            self.info.device_id,
            Arc::clone(&self.settings),
            Arc::clone(&self.diag),
        );

        self.running.set(true);
        if self.settings.start_producers() {
            for (module, param) in self.producer_registers() {
                if let Err(e) = self.transport.write(module, param, 1) {
                    self.running.set(false);
                    device_log!(self.diag, Critical, "Failed to start data producers: {}", e);
                    return Err(e.into());
                }
            }
        }
        self.receiver = Some(receiver);

        device_log!(
            self.diag,
            Debug,
            "Data acquisition started, ring buffer of {} containers.",
            sender.capacity()
        );

        Ok(Acquisition {
            translator,
            sender,
            running: self.running.clone(),
            transport: Arc::clone(&self.transport),
            settings: Arc::clone(&self.settings),
            diag: Arc::clone(&self.diag),
        })
    }

    /// Marks the run stopped. Containers already queued can still be taken.
    pub fn data_stop(&mut self) -> Result<(), DeviceError> {
        if !self.running.is_running() {
            return Err(DeviceError::NotRunning);
        }
        self.running.set(false);

        if self.settings.stop_producers() {
            for (module, param) in self.producer_registers().into_iter().rev() {
                self.transport.write(module, param, 0)?;
            }
        }

        device_log!(self.diag, Debug, "Data acquisition stopped.");
        Ok(())
    }

    /// Takes the next committed container, if any.
    pub fn data_get(&mut self) -> Option<Box<EventPacketContainer>> {
        self.receiver.as_mut()?.get()
    }

    /// Peeks at the next committed container.
    pub fn data_look(&self) -> Option<&EventPacketContainer> {
        self.receiver.as_ref()?.look()
    }

    pub fn close(mut self) -> Result<(), DeviceError> {
        if self.running.is_running() {
            self.data_stop()?;
        }
        if let Some(mut receiver) = self.receiver.take() {
            let leftover = receiver.drain().len();
            if leftover > 0 {
                device_log!(self.diag, Debug, "Discarded {} undelivered containers on close.", leftover);
            }
        }
        device_log!(self.diag, Debug, "Device closed.");
        Ok(())
    }
}

/// Producer side of one acquisition run.
pub struct Acquisition<F> {
    translator: Translator<F>,
    sender: ExchangeSender,
    running: RunFlag,
    transport: Arc<dyn RegisterTransport>,
    settings: Arc<AcquisitionSettings>,
    diag: Arc<Diagnostics>,
}

impl<F: DeviceFamily> Acquisition<F> {
    /// Decodes one USB buffer. Does nothing once the run was stopped.
    pub fn on_bytes(&mut self, bytes: &[u8]) -> Result<(), PacketError> {
        if !self.running.is_running() {
            return Ok(());
        }

        let result = self.translator.translate(bytes, &mut self.sender);
        self.send_register_writes();
        result
    }

    fn send_register_writes(&mut self) {
        for write in self.translator.take_register_writes() {
            if write.module == MODULE_APS && write.param == APS_EXPOSURE {
                self.settings.set_last_exposure(write.value);
            }

            let diag = Arc::clone(&self.diag);
            let done: WriteDone = Box::new(move |result| {
                if let Err(e) = result {
                    device_log!(
                        diag,
                        Error,
                        "Failed to write register {} of module {}: {}",
                        write.param,
                        write.module,
                        e
                    );
                }
            });

            if let Err(e) = self
                .transport
                .write_async(write.module, write.param, write.value, Some(done))
            {
                device_log!(self.diag, Error, "Failed to queue register write: {}", e);
            }
        }
    }

    pub fn translator(&self) -> &Translator<F> {
        &self.translator
    }

    pub fn stats(&self) -> ContainerStats {
        self.translator.stats()
    }

    /// Whether the consumer is behind and the next commit would be dropped.
    pub fn is_backlogged(&self) -> bool {
        self.sender.full()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }
}
