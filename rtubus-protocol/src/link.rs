//! Frame-level links over a transport
//!
//! [`MasterLink`] sends requests and collects responses; [`SlaveLink`] answers
//! requests from a [`ProtocolEngine`]. Both are polled and never block.

use crate::crc::frame_crc_ok;
use crate::engine::ProtocolEngine;
use crate::pdu::{Adu, EXCEPTION_FLAG, FunctionCode, word_at};
use crate::receiver::{FrameReceiver, Received};
use crate::statistics::LinkStatistics;
use bytes::Bytes;
use rtubus_core::regmap::BROADCAST_ID;
use rtubus_core::{Clock, LineSettings, RegisterTable, RtuResult};
use rtubus_transport::Transport;
use std::time::Duration;

fn transmit<T: Transport>(transport: &mut T, receiver: &mut FrameReceiver, adu: &[u8]) -> RtuResult<()> {
    // Anything still on the line belongs to an exchange we are abandoning
    transport.drain_input();
    receiver.clear();
    transport.begin_transmission()?;
    let written = transport.write_all(adu);
    let released = transport.end_transmission();
    written?;
    released?;
    log::trace!("Sent frame {:02X?}", adu);
    Ok(())
}

/// Master end of the line
#[derive(Debug)]
pub struct MasterLink<T, C> {
    transport: T,
    clock: C,
    receiver: FrameReceiver,
    settings: LineSettings,
    last_request: Bytes,
    expected_id: u8,
    statistics: LinkStatistics,
}

impl<T: Transport, C: Clock> MasterLink<T, C> {
    pub fn new(transport: T, clock: C, settings: LineSettings) -> Self {
        Self {
            transport,
            clock,
            receiver: FrameReceiver::new(settings.inter_frame_timeout, settings.max_frame_len),
            settings,
            last_request: Bytes::new(),
            expected_id: BROADCAST_ID,
            statistics: LinkStatistics::new(),
        }
    }

    /// Open the transport at the configured baud rate
    pub fn begin(&mut self) -> RtuResult<()> {
        self.transport.begin(self.settings.baud_rate)?;
        self.transport.listen();
        Ok(())
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn settings(&self) -> &LineSettings {
        &self.settings
    }

    pub fn statistics(&self) -> &LinkStatistics {
        &self.statistics
    }

    /// Address the outstanding request was sent to
    pub fn expected_id(&self) -> u8 {
        self.expected_id
    }

    /// ADU of the outstanding request
    pub fn last_request(&self) -> &[u8] {
        &self.last_request
    }

    /// Frame and send `pdu` to `slave`, keeping a copy for retries
    pub fn send_request(&mut self, slave: u8, pdu: &[u8]) -> RtuResult<()> {
        let adu = Bytes::from(Adu::encode(slave, pdu));
        self.expected_id = slave;
        self.last_request = adu.clone();
        transmit(&mut self.transport, &mut self.receiver, &adu)?;
        self.statistics.increment_frames_sent();
        Ok(())
    }

    /// Send the outstanding request again
    pub fn resend(&mut self) -> RtuResult<()> {
        let adu = self.last_request.clone();
        transmit(&mut self.transport, &mut self.receiver, &adu)?;
        self.statistics.increment_frames_sent();
        self.statistics.increment_retransmissions();
        Ok(())
    }

    /// Poll for a complete response frame without blocking
    pub fn poll_response(&mut self) -> Option<Bytes> {
        match self.receiver.poll(&mut self.transport, &self.clock) {
            Received::Pending => None,
            Received::Overflow => {
                self.statistics.increment_overflows();
                None
            }
            Received::Frame(frame) => {
                self.statistics.increment_frames_received();
                if !frame_crc_ok(&frame) {
                    self.statistics.increment_crc_errors();
                }
                Some(frame)
            }
        }
    }
}

/// Summary of a request a slave accepted and processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandledRequest {
    /// Function code of the request
    pub function: u8,
    /// First register addressed
    pub address: u16,
    /// Number of registers addressed
    pub count: u16,
    /// Sent to the broadcast address and left unanswered
    pub broadcast: bool,
    /// Exception code of the reply, if the request was refused
    pub exception: Option<u8>,
}

impl HandledRequest {
    fn from_request(pdu: &[u8], reply: &[u8], broadcast: bool) -> Self {
        let function = pdu.first().copied().unwrap_or(0);
        let count = match FunctionCode::from_byte(function) {
            Some(FunctionCode::WriteSingleRegister) => 1,
            Some(_) => word_at(pdu, 3),
            None => 0,
        };
        let exception = match reply {
            [code, exception] if *code & EXCEPTION_FLAG != 0 => Some(*exception),
            _ => None,
        };
        Self {
            function,
            address: word_at(pdu, 1),
            count,
            broadcast,
            exception,
        }
    }

    /// Whether the request successfully wrote registers
    pub fn is_write(&self) -> bool {
        self.exception.is_none()
            && matches!(
                FunctionCode::from_byte(self.function),
                Some(FunctionCode::WriteSingleRegister | FunctionCode::WriteMultipleRegisters)
            )
    }

    /// Whether the addressed registers overlap `[start, start + len)`
    pub fn touches(&self, start: u16, len: u16) -> bool {
        let (a0, a1) = (self.address as u32, self.address as u32 + self.count as u32);
        let (b0, b1) = (start as u32, start as u32 + len as u32);
        a0 < b1 && b0 < a1
    }
}

/// Slave end of the line
#[derive(Debug)]
pub struct SlaveLink<T, C, R> {
    transport: T,
    clock: C,
    engine: ProtocolEngine<R>,
    receiver: FrameReceiver,
    settings: LineSettings,
    slave_id: u8,
    pending_reply: Option<(Duration, Vec<u8>)>,
    statistics: LinkStatistics,
}

impl<T: Transport, C: Clock, R: RegisterTable> SlaveLink<T, C, R> {
    pub fn new(transport: T, clock: C, settings: LineSettings, engine: ProtocolEngine<R>, slave_id: u8) -> Self {
        Self {
            transport,
            clock,
            engine,
            receiver: FrameReceiver::new(settings.inter_frame_timeout, settings.max_frame_len),
            settings,
            slave_id,
            pending_reply: None,
            statistics: LinkStatistics::new(),
        }
    }

    /// Open the transport at the configured baud rate
    pub fn begin(&mut self) -> RtuResult<()> {
        self.transport.begin(self.settings.baud_rate)?;
        self.transport.listen();
        Ok(())
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    /// Answer at a new address from the next request on
    pub fn set_slave_id(&mut self, slave_id: u8) {
        log::info!("Slave address changed {} -> {}", self.slave_id, slave_id);
        self.slave_id = slave_id;
    }

    pub fn engine(&self) -> &ProtocolEngine<R> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ProtocolEngine<R> {
        &mut self.engine
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn statistics(&self) -> &LinkStatistics {
        &self.statistics
    }

    /// Whether a reply is waiting for the turnaround delay to pass
    pub fn reply_pending(&self) -> bool {
        self.pending_reply.is_some()
    }

    /// Send a due reply and process at most one complete request
    ///
    /// # Returns
    /// Summary of the request processed during this poll, if any
    pub fn poll(&mut self) -> RtuResult<Option<HandledRequest>> {
        self.flush_due_reply()?;

        let frame = match self.receiver.poll(&mut self.transport, &self.clock) {
            Received::Pending => return Ok(None),
            Received::Overflow => {
                self.statistics.increment_overflows();
                return Ok(None);
            }
            Received::Frame(frame) => frame,
        };
        self.statistics.increment_frames_received();

        if frame.len() < 4 || !frame_crc_ok(&frame) {
            log::debug!("Slave {}: dropped corrupt frame {:02X?}", self.slave_id, frame.as_ref());
            self.statistics.increment_crc_errors();
            return Ok(None);
        }
        let address = frame[0];
        let broadcast = address == BROADCAST_ID;
        if !broadcast && address != self.slave_id {
            self.statistics.increment_foreign_frames();
            return Ok(None);
        }

        let pdu = &frame[1..frame.len() - 2];
        self.engine.receive_pdu(pdu);
        let handled = HandledRequest::from_request(pdu, self.engine.reply(), broadcast);

        if !broadcast {
            let adu = Adu::encode(self.slave_id, self.engine.reply());
            if self.settings.turnaround_delay.is_zero() {
                self.send_reply(&adu)?;
            } else {
                let due = self.clock.now() + self.settings.turnaround_delay;
                self.pending_reply = Some((due, adu));
            }
        }
        Ok(Some(handled))
    }

    fn flush_due_reply(&mut self) -> RtuResult<()> {
        let due = matches!(&self.pending_reply, Some((at, _)) if self.clock.now() >= *at);
        if due {
            if let Some((_, adu)) = self.pending_reply.take() {
                self.send_reply(&adu)?;
            }
        }
        Ok(())
    }

    fn send_reply(&mut self, adu: &[u8]) -> RtuResult<()> {
        transmit(&mut self.transport, &mut self.receiver, adu)?;
        self.statistics.increment_frames_sent();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{read_holding_registers, write_single_register};
    use crate::response::ResponseFrame;
    use rtubus_core::{ManualClock, SparseRegisters};
    use rtubus_transport::MemoryLine;

    struct Bench {
        clock: ManualClock,
        master: MasterLink<MemoryLine, ManualClock>,
        slave: SlaveLink<MemoryLine, ManualClock, SparseRegisters>,
    }

    fn settings() -> LineSettings {
        LineSettings {
            inter_frame_timeout: Duration::from_millis(2),
            ..LineSettings::default()
        }
    }

    fn bench(turnaround: Duration) -> Bench {
        let clock = ManualClock::new();
        let (a, b) = MemoryLine::pair();
        let mut regs = SparseRegisters::new();
        regs.add(3, 703);
        regs.add(4, 513);
        let slave_settings = LineSettings {
            turnaround_delay: turnaround,
            ..settings()
        };
        Bench {
            clock: clock.clone(),
            master: MasterLink::new(a, clock.clone(), settings()),
            slave: SlaveLink::new(b, clock, slave_settings, ProtocolEngine::new(regs), 5),
        }
    }

    fn exchange(bench: &mut Bench) -> (Option<HandledRequest>, Option<Bytes>) {
        let mut handled = None;
        for _ in 0..20 {
            if let Some(h) = bench.slave.poll().unwrap() {
                handled = Some(h);
            }
            if let Some(frame) = bench.master.poll_response() {
                return (handled, Some(frame));
            }
            bench.clock.advance(Duration::from_millis(1));
        }
        (handled, None)
    }

    #[test]
    fn test_read_exchange() {
        let mut bench = bench(Duration::ZERO);
        bench.master.send_request(5, &read_holding_registers(3, 2).unwrap()).unwrap();
        let (handled, frame) = exchange(&mut bench);
        let frame = frame.unwrap();
        let response = ResponseFrame::new(&frame);
        assert!(response.verify_integrity(5));
        assert_eq!(response.read_registers(), Some(vec![703, 513]));
        let handled = handled.unwrap();
        assert_eq!(handled.function, 0x03);
        assert_eq!((handled.address, handled.count), (3, 2));
        assert!(!handled.is_write());
    }

    #[test]
    fn test_write_echo_and_turnaround() {
        let mut bench = bench(Duration::from_millis(3));
        bench.master.send_request(5, &write_single_register(4, 1)).unwrap();
        let (handled, frame) = exchange(&mut bench);
        let frame = frame.unwrap();
        assert!(ResponseFrame::new(&frame).is_write_reg_response(4, 1));
        assert!(handled.unwrap().is_write());
        assert!(handled.unwrap().touches(4, 1));
        assert!(!handled.unwrap().touches(5, 3));
        assert_eq!(bench.slave.engine().hreg(4), 1);
    }

    #[test]
    fn test_foreign_and_broadcast_frames() {
        let mut bench = bench(Duration::ZERO);
        bench.master.send_request(6, &write_single_register(4, 1)).unwrap();
        let (handled, frame) = exchange(&mut bench);
        assert!(handled.is_none());
        assert!(frame.is_none());
        assert_eq!(bench.slave.statistics().foreign_frames, 1);

        bench.master.send_request(BROADCAST_ID, &write_single_register(4, 9)).unwrap();
        let (handled, frame) = exchange(&mut bench);
        assert!(handled.unwrap().broadcast);
        assert!(frame.is_none());
        assert_eq!(bench.slave.engine().hreg(4), 9);
    }

    #[test]
    fn test_corrupt_frame_ignored() {
        let mut bench = bench(Duration::ZERO);
        let mut adu = Adu::encode(5, &write_single_register(4, 1));
        adu[3] ^= 0x40;
        bench.master.transport_mut().write_all(&adu).unwrap();
        let (handled, frame) = exchange(&mut bench);
        assert!(handled.is_none());
        assert!(frame.is_none());
        assert_eq!(bench.slave.statistics().crc_errors, 1);
        assert_eq!(bench.slave.engine().hreg(4), 513);
    }

    #[test]
    fn test_resend_counts_retransmission() {
        let mut bench = bench(Duration::ZERO);
        bench.master.send_request(5, &read_holding_registers(3, 1).unwrap()).unwrap();
        bench.master.resend().unwrap();
        assert_eq!(bench.master.statistics().frames_sent, 2);
        assert_eq!(bench.master.statistics().retransmissions, 1);
        assert_eq!(bench.master.expected_id(), 5);
        assert_eq!(bench.master.last_request()[0], 5);
    }

    #[test]
    fn test_exception_reported_in_summary() {
        let mut bench = bench(Duration::ZERO);
        bench.master.send_request(5, &write_single_register(99, 1)).unwrap();
        let (handled, frame) = exchange(&mut bench);
        assert_eq!(handled.unwrap().exception, Some(0x02));
        assert_eq!(ResponseFrame::new(&frame.unwrap()).exception(), Some((0x06, 0x02)));
    }
}
