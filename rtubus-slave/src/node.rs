//! Slave node
//!
//! The node owns a [`SlaveLink`] over a sparse register table laid out per
//! [`rtubus_core::regmap`]. After each request it inspects what the master
//! wrote and reacts:
//!
//! - slave id: answer at the new address from the next request on
//! - clock: forward the time to every device
//! - data request: ask the addressed device for a page of samples
//! - data in: hand the payload to the addressed device

use crate::config::SlaveConfig;
use crate::device::{DataPage, Device};
use rtubus_core::regmap::{
    DATA_IN, DATA_IN_HEADER_REGS, DATA_IN_LENGTH_OFFSET, DATA_IN_STATUS_OFFSET, DATA_PAYLOAD_REGS, DATA_REPLY,
    DATA_REPLY_HEADER_REGS, DATA_REQUEST, DATA_REQUEST_REGS, DEVICE_NAME_OFFSET, DEVICE_NUMBER_OFFSET,
    DEVICE_REGS_OFFSET, DEVICE_TYPE_OFFSET, LAST_ASSIGNED_ID, MAX_DEVICES, NEW_SLAVE_ID, NO_DEVICE_NUMBER,
    REG_CLOCK, REG_DEVICE_COUNT, REG_NAME_LENGTH, REG_PROTOCOL_VERSION, REG_SLAVE_ID, REG_STATUS, bytes_to_regs,
    device_block, join_u32, regs_to_bytes,
};
use rtubus_core::{Clock, ReceiveStatus, RtuError, RtuResult, SparseRegisters};
use rtubus_protocol::{HandledRequest, LinkStatistics, ProtocolEngine, SlaveLink};
use rtubus_transport::Transport;

const PAYLOAD_BYTES: usize = DATA_PAYLOAD_REGS as usize * 2;

/// A slave hosting up to [`MAX_DEVICES`] devices
pub struct SlaveNode<T, C> {
    link: SlaveLink<T, C, SparseRegisters>,
    config: SlaveConfig,
    devices: Vec<Box<dyn Device>>,
}

impl<T: Transport, C: Clock> SlaveNode<T, C> {
    /// Create an unaddressed node with no devices
    pub fn new(transport: T, clock: C, config: SlaveConfig) -> RtuResult<Self> {
        config.validate()?;

        let mut registers = SparseRegisters::new();
        registers.add(REG_PROTOCOL_VERSION, config.protocol_version);
        registers.add(REG_DEVICE_COUNT, 0);
        registers.add(REG_SLAVE_ID, NEW_SLAVE_ID as u16);
        registers.add(REG_NAME_LENGTH, config.name_length as u16);
        registers.add_range(REG_CLOCK, 2);
        registers.add_range(REG_STATUS, 2);
        registers.add_range(DATA_REQUEST, DATA_REQUEST_REGS);
        registers.add_range(DATA_REPLY, DATA_REPLY_HEADER_REGS + DATA_PAYLOAD_REGS);
        registers.add_range(DATA_IN, DATA_IN_HEADER_REGS + DATA_PAYLOAD_REGS);

        let link = SlaveLink::new(transport, clock, config.line, ProtocolEngine::new(registers), NEW_SLAVE_ID);
        Ok(Self {
            link,
            config,
            devices: Vec::new(),
        })
    }

    /// Open the line
    pub fn begin(&mut self) -> RtuResult<()> {
        self.link.begin()
    }

    /// Attach a device and publish its block
    ///
    /// # Returns
    /// Index of the device block
    pub fn add_device(&mut self, name: &[u8], device: Box<dyn Device>) -> RtuResult<u16> {
        let index = self.devices.len() as u16;
        if index >= MAX_DEVICES {
            return Err(RtuError::InvalidConfig(format!(
                "A slave hosts at most {} devices",
                MAX_DEVICES
            )));
        }

        let mut padded: Vec<u8> = name.iter().copied().take(self.config.name_length).collect();
        padded.resize(self.config.name_length, 0);

        let block = device_block(index);
        let registers = self.link.engine_mut().registers_mut();
        registers.add(block + DEVICE_TYPE_OFFSET, device.device_type());
        registers.add(block + DEVICE_REGS_OFFSET, device.data_registers());
        registers.add(block + DEVICE_NUMBER_OFFSET, NO_DEVICE_NUMBER);
        for (i, word) in bytes_to_regs(&padded).into_iter().enumerate() {
            registers.add(block + DEVICE_NAME_OFFSET + i as u16, word);
        }
        registers.add(REG_DEVICE_COUNT, index + 1);

        self.devices.push(device);
        log::debug!("Added device {} as block {}", String::from_utf8_lossy(name), index);
        Ok(index)
    }

    pub fn slave_id(&self) -> u8 {
        self.link.slave_id()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn config(&self) -> &SlaveConfig {
        &self.config
    }

    pub fn engine(&self) -> &ProtocolEngine<SparseRegisters> {
        self.link.engine()
    }

    pub fn statistics(&self) -> &LinkStatistics {
        self.link.statistics()
    }

    /// Directory row assigned to device block `index`, if any
    pub fn device_number(&self, index: u16) -> Option<u16> {
        if index as usize >= self.devices.len() {
            return None;
        }
        let number = self.engine().hreg(device_block(index) + DEVICE_NUMBER_OFFSET);
        (number != NO_DEVICE_NUMBER).then_some(number)
    }

    /// Serve the line once
    ///
    /// # Returns
    /// The request processed during this poll, if any
    pub fn poll(&mut self) -> RtuResult<Option<HandledRequest>> {
        let Some(request) = self.link.poll()? else {
            return Ok(None);
        };
        if request.is_write() {
            self.apply_write(&request);
        }
        Ok(Some(request))
    }

    fn apply_write(&mut self, request: &HandledRequest) {
        if request.touches(REG_PROTOCOL_VERSION, 2) || request.touches(REG_NAME_LENGTH, 1) {
            self.restore_read_only();
        }
        if request.touches(REG_SLAVE_ID, 1) {
            self.readdress(request.broadcast);
        }
        if request.touches(REG_CLOCK, 2) {
            let engine = self.link.engine();
            let clock = join_u32(engine.hreg(REG_CLOCK), engine.hreg(REG_CLOCK + 1));
            log::debug!("Slave {}: clock set to {}", self.slave_id(), clock);
            for device in self.devices.iter_mut() {
                device.set_clock(clock);
            }
        }
        if request.broadcast {
            return;
        }
        if request.touches(DATA_REQUEST, DATA_REQUEST_REGS) {
            self.serve_data_request();
        }
        if request.touches(DATA_IN, DATA_IN_HEADER_REGS + DATA_PAYLOAD_REGS) {
            self.receive_data();
        }
    }

    fn restore_read_only(&mut self) {
        let count = self.devices.len() as u16;
        let engine = self.link.engine_mut();
        engine.set_hreg(REG_PROTOCOL_VERSION, self.config.protocol_version);
        engine.set_hreg(REG_DEVICE_COUNT, count);
        engine.set_hreg(REG_NAME_LENGTH, self.config.name_length as u16);
    }

    fn readdress(&mut self, broadcast: bool) {
        let current = self.link.slave_id();
        let requested = self.link.engine().hreg(REG_SLAVE_ID);
        if broadcast || requested == 0 || requested > LAST_ASSIGNED_ID as u16 {
            log::warn!("Slave {}: refused slave id {}", current, requested);
            self.link.engine_mut().set_hreg(REG_SLAVE_ID, current as u16);
            return;
        }
        self.link.set_slave_id(requested as u8);
    }

    fn device_for_row(&self, row: u16) -> Option<usize> {
        if row == NO_DEVICE_NUMBER {
            return None;
        }
        (0..self.devices.len()).find(|&i| self.engine().hreg(device_block(i as u16) + DEVICE_NUMBER_OFFSET) == row)
    }

    fn serve_data_request(&mut self) {
        let engine = self.link.engine();
        let row = engine.hreg(DATA_REQUEST);
        let start_time = join_u32(engine.hreg(DATA_REQUEST + 1), engine.hreg(DATA_REQUEST + 2));
        let page = engine.hreg(DATA_REQUEST + 3);
        let num_points = engine.hreg(DATA_REQUEST + 4);

        let mut buffer = [0u8; PAYLOAD_BYTES];
        let mut data = match self.device_for_row(row) {
            Some(index) => self.devices[index].read_data(start_time, num_points, page, &mut buffer),
            None => {
                log::debug!("Slave {}: data request for unknown row {}", self.slave_id(), row);
                DataPage::EMPTY
            }
        };
        if data.byte_len() > PAYLOAD_BYTES {
            log::warn!(
                "Slave {}: device page of {} bytes exceeds the reply window",
                self.slave_id(),
                data.byte_len()
            );
            data = DataPage::EMPTY;
        }

        let engine = self.link.engine_mut();
        engine.set_hreg(DATA_REPLY, data.count);
        engine.set_hreg(DATA_REPLY + 1, data.pages_remaining);
        engine.set_hreg(DATA_REPLY + 2, data.point_size_bits);
        for (i, word) in bytes_to_regs(&buffer).into_iter().enumerate() {
            engine.set_hreg(DATA_REPLY + DATA_REPLY_HEADER_REGS + i as u16, word);
        }
    }

    fn receive_data(&mut self) {
        let engine = self.link.engine();
        let row = engine.hreg(DATA_IN);
        let len = engine.hreg(DATA_IN + DATA_IN_LENGTH_OFFSET) as usize;
        let payload: Vec<u16> = (0..DATA_PAYLOAD_REGS)
            .map(|i| engine.hreg(DATA_IN + DATA_IN_HEADER_REGS + i))
            .collect();

        let status = if len > PAYLOAD_BYTES {
            ReceiveStatus::Rejected
        } else {
            match self.device_for_row(row) {
                None => ReceiveStatus::Unsupported,
                Some(index) => {
                    let device = &mut self.devices[index];
                    match device.prepare_receive_data(len) {
                        ReceiveStatus::Accepted => device.receive_device_data(&regs_to_bytes(&payload, len)),
                        refused => refused,
                    }
                }
            }
        };
        log::debug!("Slave {}: received {} bytes for row {}: {:?}", self.slave_id(), len, row, status);
        self.link
            .engine_mut()
            .set_hreg(DATA_IN + DATA_IN_STATUS_OFFSET, status.to_register());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDevice;
    use bytes::Bytes;
    use mockall::predicate::eq;
    use rtubus_core::regmap::{BROADCAST_ID, HEADER_REGS, PROTOCOL_VERSION, split_u32};
    use rtubus_core::{LineSettings, ManualClock};
    use rtubus_protocol::pdu::{read_holding_registers, write_multiple_registers, write_single_register};
    use rtubus_protocol::{MasterLink, ResponseFrame};
    use rtubus_transport::MemoryLine;
    use std::time::Duration;

    struct Bench {
        clock: ManualClock,
        node: SlaveNode<MemoryLine, ManualClock>,
        master: MasterLink<MemoryLine, ManualClock>,
    }

    impl Bench {
        fn new() -> Self {
            let clock = ManualClock::new();
            let (a, b) = MemoryLine::pair();
            let mut node = SlaveNode::new(b, clock.clone(), SlaveConfig::default()).unwrap();
            let mut master = MasterLink::new(a, clock.clone(), LineSettings::default());
            node.begin().unwrap();
            master.begin().unwrap();
            Self { clock, node, master }
        }

        fn exchange(&mut self, slave: u8, pdu: &[u8]) -> Option<Bytes> {
            self.master.send_request(slave, pdu).unwrap();
            for _ in 0..30 {
                self.node.poll().unwrap();
                if let Some(frame) = self.master.poll_response() {
                    return Some(frame);
                }
                self.clock.advance(Duration::from_millis(1));
            }
            None
        }

        fn read(&mut self, slave: u8, start: u16, count: u16) -> Vec<u16> {
            let frame = self.exchange(slave, &read_holding_registers(start, count).unwrap()).unwrap();
            ResponseFrame::new(&frame).read_registers().unwrap()
        }
    }

    fn meter(device_type: u16) -> MockDevice {
        let mut device = MockDevice::new();
        device.expect_device_type().return_const(device_type);
        device.expect_data_registers().return_const(4u16);
        device
    }

    #[test]
    fn test_header_and_device_block() {
        let mut bench = Bench::new();
        assert_eq!(bench.node.add_device(b"meter", Box::new(meter(7))).unwrap(), 0);

        let header = bench.read(NEW_SLAVE_ID, 0, HEADER_REGS);
        assert_eq!(header[0], PROTOCOL_VERSION);
        assert_eq!(header[1], 1);
        assert_eq!(header[2], NEW_SLAVE_ID as u16);
        assert_eq!(header[3], 8);

        let block = bench.read(NEW_SLAVE_ID, device_block(0), DEVICE_NAME_OFFSET + 4);
        assert_eq!(&block[..3], &[7, 4, NO_DEVICE_NUMBER]);
        assert_eq!(regs_to_bytes(&block[3..], 8), b"meter\0\0\0".to_vec());
        assert_eq!(bench.node.device_number(0), None);
    }

    #[test]
    fn test_device_limit() {
        let mut bench = Bench::new();
        for _ in 0..MAX_DEVICES {
            bench.node.add_device(b"m", Box::new(meter(1))).unwrap();
        }
        assert!(bench.node.add_device(b"m", Box::new(meter(1))).is_err());
        assert_eq!(bench.node.device_count(), MAX_DEVICES as usize);
    }

    #[test]
    fn test_readdress_after_reply() {
        let mut bench = Bench::new();
        let frame = bench
            .exchange(NEW_SLAVE_ID, &write_single_register(REG_SLAVE_ID, 5))
            .unwrap();
        let response = ResponseFrame::new(&frame);
        assert!(response.verify_integrity(NEW_SLAVE_ID));
        assert!(response.is_write_reg_response(REG_SLAVE_ID, 5));
        assert_eq!(bench.node.slave_id(), 5);

        assert!(bench.exchange(NEW_SLAVE_ID, &read_holding_registers(0, 1).unwrap()).is_none());
        assert_eq!(bench.read(5, REG_SLAVE_ID, 1), vec![5]);
    }

    #[test]
    fn test_invalid_slave_id_refused() {
        let mut bench = Bench::new();
        bench.exchange(NEW_SLAVE_ID, &write_single_register(REG_SLAVE_ID, 300));
        assert_eq!(bench.node.slave_id(), NEW_SLAVE_ID);
        assert_eq!(bench.read(NEW_SLAVE_ID, REG_SLAVE_ID, 1), vec![NEW_SLAVE_ID as u16]);
    }

    #[test]
    fn test_read_only_header_restored() {
        let mut bench = Bench::new();
        bench.exchange(NEW_SLAVE_ID, &write_single_register(REG_PROTOCOL_VERSION, 9));
        assert_eq!(bench.read(NEW_SLAVE_ID, REG_PROTOCOL_VERSION, 1), vec![PROTOCOL_VERSION]);
    }

    #[test]
    fn test_broadcast_clock_reaches_devices() {
        let mut bench = Bench::new();
        let mut device = meter(1);
        device.expect_set_clock().with(eq(0x0001_0002)).times(1).return_const(());
        bench.node.add_device(b"clocked", Box::new(device)).unwrap();

        let pdu = write_multiple_registers(REG_CLOCK, &split_u32(0x0001_0002)).unwrap();
        assert!(bench.exchange(BROADCAST_ID, &pdu).is_none());
        assert_eq!(bench.node.statistics().frames_sent, 0);
    }

    #[test]
    fn test_data_request_fills_reply() {
        let mut bench = Bench::new();
        let mut device = meter(2);
        device
            .expect_read_data()
            .times(1)
            .returning(|start_time, num_points, page, buffer: &mut [u8]| {
                assert_eq!((start_time, num_points, page), (0x0001_0000, 64, 0));
                buffer[..4].copy_from_slice(&[0x12, 0x34, 0x56, 0x78]);
                DataPage {
                    count: 2,
                    pages_remaining: 0,
                    point_size_bits: 16,
                }
            });
        bench.node.add_device(b"logger", Box::new(device)).unwrap();
        bench.exchange(NEW_SLAVE_ID, &write_single_register(device_block(0) + DEVICE_NUMBER_OFFSET, 3));
        assert_eq!(bench.node.device_number(0), Some(3));

        let request = write_multiple_registers(DATA_REQUEST, &[3, 1, 0, 0, 64]).unwrap();
        let frame = bench.exchange(NEW_SLAVE_ID, &request).unwrap();
        assert!(ResponseFrame::new(&frame).is_write_regs_response(DATA_REQUEST, 5));

        let reply = bench.read(NEW_SLAVE_ID, DATA_REPLY, DATA_REPLY_HEADER_REGS + 2);
        assert_eq!(reply, vec![2, 0, 16, 0x1234, 0x5678]);
    }

    #[test]
    fn test_data_request_unknown_row() {
        let mut bench = Bench::new();
        bench.node.add_device(b"logger", Box::new(meter(2))).unwrap();
        let request = write_multiple_registers(DATA_REQUEST, &[9, 0, 0, 0, 64]).unwrap();
        bench.exchange(NEW_SLAVE_ID, &request).unwrap();
        assert_eq!(bench.read(NEW_SLAVE_ID, DATA_REPLY, DATA_REPLY_HEADER_REGS), vec![0, 0, 0]);
    }

    #[test]
    fn test_data_in_delivered() {
        let mut bench = Bench::new();
        let mut device = meter(2);
        device
            .expect_prepare_receive_data()
            .with(eq(3))
            .times(1)
            .return_const(ReceiveStatus::Accepted);
        device
            .expect_receive_device_data()
            .withf(|data: &[u8]| data == b"abc")
            .times(1)
            .return_const(ReceiveStatus::Accepted);
        bench.node.add_device(b"sink", Box::new(device)).unwrap();
        bench.exchange(NEW_SLAVE_ID, &write_single_register(device_block(0) + DEVICE_NUMBER_OFFSET, 0));

        let mut regs = vec![0, 3, ReceiveStatus::Idle.to_register()];
        regs.extend(bytes_to_regs(b"abc"));
        bench.exchange(NEW_SLAVE_ID, &write_multiple_registers(DATA_IN, &regs).unwrap()).unwrap();

        let status = bench.read(NEW_SLAVE_ID, DATA_IN + DATA_IN_STATUS_OFFSET, 1);
        assert_eq!(ReceiveStatus::from_register(status[0]), Some(ReceiveStatus::Accepted));
    }

    #[test]
    fn test_data_in_busy_device() {
        let mut bench = Bench::new();
        let mut device = meter(2);
        device.expect_prepare_receive_data().return_const(ReceiveStatus::Busy);
        device.expect_receive_device_data().never();
        bench.node.add_device(b"sink", Box::new(device)).unwrap();
        bench.exchange(NEW_SLAVE_ID, &write_single_register(device_block(0) + DEVICE_NUMBER_OFFSET, 0));

        bench
            .exchange(NEW_SLAVE_ID, &write_multiple_registers(DATA_IN, &[0, 2, 0, 0x0102]).unwrap())
            .unwrap();
        let status = bench.read(NEW_SLAVE_ID, DATA_IN + DATA_IN_STATUS_OFFSET, 1);
        assert_eq!(ReceiveStatus::from_register(status[0]), Some(ReceiveStatus::Busy));
    }
}
