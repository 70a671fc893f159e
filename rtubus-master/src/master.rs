//! Master workflow orchestrator
//!
//! Workflows are `async` functions over `&mut Master`. Each register operation
//! inside them is a [`RetryableTask`] stepped once per poll, with a
//! [`yield_now`] between steps, so a workflow never blocks its caller:
//!
//! ```rust,no_run
//! # use rtubus_master::{Master, MasterConfig, HostLink, MalfunctionKind, RequestResult};
//! # use rtubus_core::{MemoryDirectory, MonotonicClock};
//! # use rtubus_transport::MemoryLine;
//! # use rtubus_task::AsyncTask;
//! # struct Host;
//! # impl HostLink for Host {
//! #     fn current_time(&self) -> u32 { 0 }
//! #     fn report_malfunction(&mut self, _: MalfunctionKind, _: RequestResult) {}
//! #     fn send_device_data(&mut self, _: &[u8], _: u32, _: u16, _: u16, _: &[u8]) {}
//! # }
//! # fn main() -> rtubus_core::RtuResult<()> {
//! # let (line, _) = MemoryLine::pair();
//! let directory = MemoryDirectory::new(8, 32)?;
//! let mut master = Master::new(line, MonotonicClock::new(), directory, Host, MasterConfig::default())?;
//! master.begin()?;
//! let mut cycle = AsyncTask::new(master.run_cycle());
//! while !cycle.step() {
//!     // serve other tasks here
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::MasterConfig;
use crate::host::{HostLink, MalfunctionKind};
use crate::request::{
    RegisterRequest, RequestResult, interpret_read, interpret_write_multiple, interpret_write_single,
};
use bytes::Bytes;
use rtubus_core::regmap::{
    BROADCAST_ID, DATA_IN, DATA_IN_STATUS_OFFSET, DATA_PAYLOAD_REGS, DATA_REPLY, DATA_REPLY_HEADER_REGS,
    DATA_REQUEST, DEVICE_NAME_OFFSET, DEVICE_NUMBER_OFFSET, DEVICE_REGS_OFFSET, DEVICE_TYPE_OFFSET, HEADER_REGS,
    MAX_DEVICES, NEW_SLAVE_ID, PROTOCOL_VERSION, REG_CLOCK, REG_DEVICE_COUNT, REG_NAME_LENGTH,
    REG_PROTOCOL_VERSION, REG_SLAVE_ID, bytes_to_regs, device_block, name_regs, regs_to_bytes, split_u32,
};
use rtubus_core::{Clock, DeviceDirectory, DeviceRow, ReceiveStatus, RetryBudget, RtuResult};
use rtubus_protocol::pdu::{read_holding_registers, write_multiple_registers, write_single_register};
use rtubus_protocol::{LinkStatistics, MasterLink};
use rtubus_task::{RetryableTask, TaskStatus, yield_now};
use rtubus_transport::Transport;
use std::collections::BTreeMap;
use std::time::Duration;

const PAYLOAD_BYTES: usize = DATA_PAYLOAD_REGS as usize * 2;

/// Points asked for per data page
const POINTS_PER_PAGE: u16 = DATA_PAYLOAD_REGS;

/// Domain outcome of discovery and onboarding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlaveOutcome {
    /// A slave answered (discovery) or was registered (onboarding)
    Found,
    /// Nothing answered at the new-slave address
    NotFound,
    /// The slave answered but cannot be taken on
    BadSlave,
    /// The exchange failed; a malfunction was reported
    Error,
}

/// Totals of one data transfer pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferReport {
    /// Devices whose data was relayed
    pub devices: usize,
    /// Points relayed to the host
    pub points: u32,
    /// Devices that could not be read
    pub errors: usize,
}

/// What one [`Master::run_cycle`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub discovery: SlaveOutcome,
    /// Set when discovery found a slave
    pub onboarding: Option<SlaveOutcome>,
    /// Set when a clock broadcast was due
    pub broadcast: Option<Result<(), RequestResult>>,
    pub transfer: TransferReport,
}

/// Bus master
pub struct Master<T, C, D, H> {
    link: MasterLink<T, C>,
    directory: D,
    host: H,
    config: MasterConfig,
    ledger: Vec<Option<u32>>,
    backlog: Vec<BTreeMap<u16, u32>>,
    last_broadcast: Option<Duration>,
}

impl<T, C, D, H> Master<T, C, D, H>
where
    T: Transport,
    C: Clock + Clone,
    D: DeviceDirectory,
    H: HostLink,
{
    pub fn new(transport: T, clock: C, directory: D, host: H, config: MasterConfig) -> RtuResult<Self> {
        config.validate()?;
        let link = MasterLink::new(transport, clock, config.line);
        let ledger = vec![None; config.time_scales.len()];
        let backlog = vec![BTreeMap::new(); config.time_scales.len()];
        Ok(Self {
            link,
            directory,
            host,
            config,
            ledger,
            backlog,
            last_broadcast: None,
        })
    }

    /// Open the line
    pub fn begin(&mut self) -> RtuResult<()> {
        self.link.begin()
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut D {
        &mut self.directory
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn link(&self) -> &MasterLink<T, C> {
        &self.link
    }

    pub fn statistics(&self) -> &LinkStatistics {
        self.link.statistics()
    }

    /// Host time of the last transfer pass for time scale `index`
    pub fn last_update(&self, index: usize) -> Option<u32> {
        self.ledger.get(index).copied().flatten()
    }

    /// Start time a device on time scale `index` is still owed data from
    pub fn pending_since(&self, index: usize, device_number: u16) -> Option<u32> {
        self.backlog.get(index)?.get(&device_number).copied()
    }

    fn malfunction(&mut self, kind: MalfunctionKind, cause: RequestResult) {
        log::error!("Malfunction in {:?}: {}", kind, cause);
        self.host.report_malfunction(kind, cause);
    }

    /// Run one request to a terminal status
    async fn exchange(&mut self, slave: u8, pdu: Vec<u8>, budget: RetryBudget) -> Result<Option<Bytes>, RequestResult> {
        let clock = self.link.clock().clone();
        let mut task = RetryableTask::new(RegisterRequest::new(&mut self.link, slave, pdu), clock, budget);
        while !task.work() {
            yield_now().await;
        }
        let status = task.status();
        let response = task.into_steps().into_response();
        if status != TaskStatus::Complete {
            return Err(RequestResult::from_status(status));
        }
        if slave == BROADCAST_ID {
            self.settle().await;
        }
        Ok(response)
    }

    /// Leave the line quiet long enough for slaves to act on a broadcast
    ///
    /// A slave only closes a frame once it has polled after the silence, so
    /// the master waits for two silences before it may transmit again.
    async fn settle(&mut self) {
        let line = &self.config.line;
        let gap = line.inter_frame_timeout * 2 + line.turnaround_delay;
        let started = self.link.clock().now();
        while self.link.clock().since(started) < gap {
            yield_now().await;
        }
    }

    async fn read_with(
        &mut self,
        slave: u8,
        start: u16,
        count: u16,
        budget: RetryBudget,
    ) -> Result<Vec<u16>, RequestResult> {
        if slave == BROADCAST_ID {
            return Err(RequestResult::MasterFailure);
        }
        let pdu = read_holding_registers(start, count).map_err(|e| {
            log::error!("Invalid read of {} registers at {:#06X}: {}", count, start, e);
            RequestResult::MasterFailure
        })?;
        match self.exchange(slave, pdu, budget).await? {
            Some(frame) => interpret_read(&frame, count),
            None => Err(RequestResult::MasterFailure),
        }
    }

    /// Read `count` holding registers from `slave`
    pub async fn read_registers(&mut self, slave: u8, start: u16, count: u16) -> Result<Vec<u16>, RequestResult> {
        let budget = self.config.request_budget;
        self.read_with(slave, start, count, budget).await
    }

    /// Write one holding register of `slave`
    pub async fn write_register(&mut self, slave: u8, address: u16, value: u16) -> Result<(), RequestResult> {
        let budget = self.config.request_budget;
        match self.exchange(slave, write_single_register(address, value), budget).await? {
            Some(frame) => interpret_write_single(&frame, address, value),
            None => Ok(()),
        }
    }

    /// Write consecutive holding registers of `slave`
    pub async fn write_registers(&mut self, slave: u8, start: u16, values: &[u16]) -> Result<(), RequestResult> {
        let pdu = write_multiple_registers(start, values).map_err(|e| {
            log::error!("Invalid write of {} registers at {:#06X}: {}", values.len(), start, e);
            RequestResult::MasterFailure
        })?;
        let budget = self.config.request_budget;
        match self.exchange(slave, pdu, budget).await? {
            Some(frame) => interpret_write_multiple(&frame, start, values.len() as u16),
            None => Ok(()),
        }
    }

    /// Write consecutive holding registers of every slave, unacknowledged
    pub async fn broadcast_registers(&mut self, start: u16, values: &[u16]) -> Result<(), RequestResult> {
        self.write_registers(BROADCAST_ID, start, values).await
    }

    /// Ask the new-slave address whether an unaddressed slave is waiting
    pub async fn check_for_new_slaves(&mut self) -> SlaveOutcome {
        let budget = self.config.discovery_budget;
        match self
            .read_with(NEW_SLAVE_ID, REG_PROTOCOL_VERSION, HEADER_REGS, budget)
            .await
        {
            Ok(_) => {
                log::info!("Unaddressed slave answered");
                SlaveOutcome::Found
            }
            Err(RequestResult::TaskFailure) => SlaveOutcome::NotFound,
            Err(cause) => {
                self.malfunction(MalfunctionKind::Discovery, cause);
                SlaveOutcome::Error
            }
        }
    }

    /// Register the devices of the slave at the new-slave address and give it
    /// a bus address of its own
    ///
    /// Directory entries made for the slave are removed again if onboarding
    /// stops halfway.
    pub async fn process_new_slave(&mut self) -> SlaveOutcome {
        let header = match self
            .read_registers(NEW_SLAVE_ID, REG_PROTOCOL_VERSION, HEADER_REGS)
            .await
        {
            Ok(header) => header,
            Err(cause) => return self.onboarding_failed(None, cause),
        };

        let version = header[REG_PROTOCOL_VERSION as usize];
        if version != PROTOCOL_VERSION {
            log::warn!("Rejected slave with protocol version {}", version);
            return SlaveOutcome::BadSlave;
        }
        let device_count = header[REG_DEVICE_COUNT as usize];
        if device_count == 0 || device_count > MAX_DEVICES {
            log::warn!("Rejected slave advertising {} devices", device_count);
            return SlaveOutcome::BadSlave;
        }
        let name_len = header[REG_NAME_LENGTH as usize] as usize;
        if name_len != self.directory.device_name_length() {
            log::warn!(
                "Rejected slave with name length {}, directory uses {}",
                name_len,
                self.directory.device_name_length()
            );
            return SlaveOutcome::BadSlave;
        }
        let Some(slave_id) = self.directory.find_free_slave_id() else {
            log::warn!("Rejected slave: no free slave id");
            return SlaveOutcome::BadSlave;
        };

        for index in 0..device_count {
            let block = device_block(index);
            let regs = match self
                .read_registers(NEW_SLAVE_ID, block, DEVICE_NAME_OFFSET + name_regs(name_len))
                .await
            {
                Ok(regs) => regs,
                Err(cause) => return self.onboarding_failed(Some(slave_id), cause),
            };
            let name = regs_to_bytes(&regs[DEVICE_NAME_OFFSET as usize..], name_len);

            let existing = self.directory.find_device_for_name(&name);
            let Some(device_number) = existing
                .map(|row| row.device_number)
                .or_else(|| self.directory.find_free_row())
            else {
                log::warn!("Rejected slave: directory is full");
                self.roll_back(slave_id);
                return SlaveOutcome::BadSlave;
            };
            let row = DeviceRow {
                slave_id,
                device_number,
                device_type: regs[DEVICE_TYPE_OFFSET as usize],
                device_regs: regs[DEVICE_REGS_OFFSET as usize],
            };
            if let Err(e) = self.directory.add_or_replace_device(&name, row) {
                log::error!("Directory refused {}: {}", String::from_utf8_lossy(&name), e);
                return self.onboarding_failed(Some(slave_id), RequestResult::MasterFailure);
            }
            if let Err(cause) = self
                .write_register(NEW_SLAVE_ID, block + DEVICE_NUMBER_OFFSET, device_number)
                .await
            {
                return self.onboarding_failed(Some(slave_id), cause);
            }
        }

        // Last, so a half-onboarded slave still answers at the new-slave address
        if let Err(cause) = self.write_register(NEW_SLAVE_ID, REG_SLAVE_ID, slave_id as u16).await {
            return self.onboarding_failed(Some(slave_id), cause);
        }
        log::info!("Onboarded slave {} with {} device(s)", slave_id, device_count);
        SlaveOutcome::Found
    }

    fn roll_back(&mut self, slave_id: u8) {
        let removed = self.directory.filter_devices_for_slave(&[], slave_id);
        if removed > 0 {
            log::warn!("Removed {} directory entries of slave {}", removed, slave_id);
        }
    }

    fn onboarding_failed(&mut self, slave_id: Option<u8>, cause: RequestResult) -> SlaveOutcome {
        if let Some(slave_id) = slave_id {
            self.roll_back(slave_id);
        }
        self.malfunction(MalfunctionKind::Onboarding, cause);
        SlaveOutcome::Error
    }

    /// Broadcast the host time to every slave
    pub async fn broadcast_time(&mut self) -> Result<(), RequestResult> {
        let now = self.host.current_time();
        let result = self.broadcast_registers(REG_CLOCK, &split_u32(now)).await;
        match result {
            Ok(()) => {
                self.last_broadcast = Some(self.link.clock().now());
                log::debug!("Broadcast time {}", now);
            }
            Err(cause) => self.malfunction(MalfunctionKind::TimeBroadcast, cause),
        }
        result
    }

    fn broadcast_due(&self) -> bool {
        let interval = self.config.broadcast_interval;
        !interval.is_zero()
            && self
                .last_broadcast
                .is_none_or(|last| self.link.clock().since(last) >= interval)
    }

    /// Relay data of every device whose time scale is due
    ///
    /// A time scale's ledger entry moves on once every device on it has been
    /// processed. A device that could not be read keeps the start time it
    /// missed and is asked for it again on the next pass.
    pub async fn transfer_pending_data(&mut self) -> TransferReport {
        let now = self.host.current_time();
        let scales = self.config.time_scales.clone();
        let mut report = TransferReport::default();

        for (index, scale) in scales.iter().enumerate() {
            let last = self.ledger[index];
            if !scale.is_due(last, now) {
                continue;
            }
            let scale_start = last.unwrap_or(0);
            let due: Vec<(Vec<u8>, DeviceRow)> = self
                .directory
                .rows()
                .into_iter()
                .filter(|(_, row)| scale.covers(row.device_type))
                .collect();

            self.backlog[index].retain(|number, _| due.iter().any(|(_, row)| row.device_number == *number));

            for (name, row) in due {
                let start_time = self
                    .pending_since(index, row.device_number)
                    .unwrap_or(scale_start);
                match self.read_and_send_device_data(&name, row, start_time).await {
                    Ok(points) => {
                        self.backlog[index].remove(&row.device_number);
                        report.devices += 1;
                        report.points += points;
                    }
                    Err(cause) => {
                        self.backlog[index].insert(row.device_number, start_time);
                        report.errors += 1;
                        self.malfunction(
                            MalfunctionKind::DataTransfer {
                                slave_id: row.slave_id,
                                device_number: row.device_number,
                            },
                            cause,
                        );
                    }
                }
            }
            self.ledger[index] = Some(now);
        }
        report
    }

    /// Read every page of samples a device holds since `start_time` and pass
    /// them to the host
    ///
    /// # Returns
    /// Number of points relayed
    pub async fn read_and_send_device_data(
        &mut self,
        name: &[u8],
        row: DeviceRow,
        start_time: u32,
    ) -> Result<u32, RequestResult> {
        let [start_hi, start_lo] = split_u32(start_time);
        let mut points = 0u32;
        let mut page = 0u16;
        loop {
            let request = [row.device_number, start_hi, start_lo, page, POINTS_PER_PAGE];
            self.write_registers(row.slave_id, DATA_REQUEST, &request).await?;
            let reply = self
                .read_registers(row.slave_id, DATA_REPLY, DATA_REPLY_HEADER_REGS + DATA_PAYLOAD_REGS)
                .await?;

            let (count, remaining, point_size_bits) = (reply[0], reply[1], reply[2]);
            let len = (count as usize * point_size_bits as usize).div_ceil(8);
            if len > PAYLOAD_BYTES {
                return Err(RequestResult::IncorrectResponseSize);
            }
            if count > 0 {
                let payload = regs_to_bytes(&reply[DATA_REPLY_HEADER_REGS as usize..], len);
                self.host
                    .send_device_data(name, start_time, page, point_size_bits, &payload);
                points += count as u32;
            }
            if remaining == 0 {
                break;
            }
            page = page.checked_add(1).ok_or(RequestResult::OtherResponse)?;
        }
        log::debug!(
            "Relayed {} points of {} in {} page(s)",
            points,
            String::from_utf8_lossy(name),
            u32::from(page) + 1
        );
        Ok(points)
    }

    /// Push `payload` to the device called `name`
    ///
    /// # Returns
    /// What the device made of the data
    pub async fn send_device_data(&mut self, name: &[u8], payload: &[u8]) -> Result<ReceiveStatus, RequestResult> {
        let Some(row) = self.directory.find_device_for_name(name) else {
            log::warn!("No device called {}", String::from_utf8_lossy(name));
            return Err(RequestResult::MasterFailure);
        };
        if payload.len() > PAYLOAD_BYTES {
            return Err(RequestResult::MasterFailure);
        }
        let kind = MalfunctionKind::DataDelivery {
            slave_id: row.slave_id,
            device_number: row.device_number,
        };

        let mut regs = vec![
            row.device_number,
            payload.len() as u16,
            ReceiveStatus::Idle.to_register(),
        ];
        regs.extend(bytes_to_regs(payload));
        if let Err(cause) = self.write_registers(row.slave_id, DATA_IN, &regs).await {
            self.malfunction(kind, cause);
            return Err(cause);
        }
        let status = match self
            .read_registers(row.slave_id, DATA_IN + DATA_IN_STATUS_OFFSET, 1)
            .await
        {
            Ok(status) => status[0],
            Err(cause) => {
                self.malfunction(kind, cause);
                return Err(cause);
            }
        };
        ReceiveStatus::from_register(status).ok_or(RequestResult::OtherResponse)
    }

    /// One pass of every workflow: discovery, onboarding, time broadcast and
    /// data transfer
    pub async fn run_cycle(&mut self) -> CycleReport {
        let discovery = self.check_for_new_slaves().await;
        let onboarding = if discovery == SlaveOutcome::Found {
            Some(self.process_new_slave().await)
        } else {
            None
        };
        // A freshly onboarded slave has no time yet
        let broadcast = if onboarding == Some(SlaveOutcome::Found) || self.broadcast_due() {
            Some(self.broadcast_time().await)
        } else {
            None
        };
        let transfer = self.transfer_pending_data().await;
        CycleReport {
            discovery,
            onboarding,
            broadcast,
            transfer,
        }
    }
}
