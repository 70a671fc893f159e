//! Retryable register requests
//!
//! [`RegisterRequest`] binds the three retry steps to a [`MasterLink`]:
//! `begin` sends the request, `check` polls for a response that passes the
//! integrity check, `retry` sends the same frame again. Interpreting the
//! accepted response is left to the `interpret_*` functions.

use bytes::Bytes;
use rtubus_core::Clock;
use rtubus_core::regmap::BROADCAST_ID;
use rtubus_protocol::pdu::FunctionCode;
use rtubus_protocol::{MasterLink, ResponseFrame};
use rtubus_task::{Retryable, TaskStatus};
use rtubus_transport::Transport;
use std::fmt;

/// Outcome of one register operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestResult {
    /// The slave did what was asked
    Success,
    /// The request could not be sent
    MasterFailure,
    /// No valid response within the retry budget
    TaskFailure,
    /// The slave answered with an exception
    ExceptionResponse,
    /// The slave answered something other than what was asked
    OtherResponse,
    /// The response had the right function but the wrong size
    IncorrectResponseSize,
}

impl fmt::Display for RequestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RequestResult::Success => "success",
            RequestResult::MasterFailure => "master failure",
            RequestResult::TaskFailure => "no valid response",
            RequestResult::ExceptionResponse => "exception response",
            RequestResult::OtherResponse => "unexpected response",
            RequestResult::IncorrectResponseSize => "incorrect response size",
        };
        f.write_str(text)
    }
}

impl RequestResult {
    /// Classify the terminal status of a request task
    pub fn from_status(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Complete => RequestResult::Success,
            TaskStatus::Fatal => RequestResult::MasterFailure,
            _ => RequestResult::TaskFailure,
        }
    }
}

/// One request/response exchange over a master link
#[derive(Debug)]
pub struct RegisterRequest<'l, T, C> {
    link: &'l mut MasterLink<T, C>,
    slave: u8,
    pdu: Vec<u8>,
    response: Option<Bytes>,
    rejected: u32,
}

impl<'l, T: Transport, C: Clock> RegisterRequest<'l, T, C> {
    pub fn new(link: &'l mut MasterLink<T, C>, slave: u8, pdu: Vec<u8>) -> Self {
        Self {
            link,
            slave,
            pdu,
            response: None,
            rejected: 0,
        }
    }

    pub fn slave(&self) -> u8 {
        self.slave
    }

    /// Frames received that failed the integrity check
    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    /// The accepted response, `None` for broadcasts
    pub fn into_response(self) -> Option<Bytes> {
        self.response
    }
}

impl<T: Transport, C: Clock> Retryable for RegisterRequest<'_, T, C> {
    fn begin(&mut self) -> TaskStatus {
        self.response = None;
        if let Err(e) = self.link.send_request(self.slave, &self.pdu) {
            log::error!("Sending request to slave {} failed: {}", self.slave, e);
            return TaskStatus::Fatal;
        }
        if self.slave == BROADCAST_ID {
            TaskStatus::Complete
        } else {
            TaskStatus::InProgress
        }
    }

    fn check(&mut self) -> TaskStatus {
        let Some(frame) = self.link.poll_response() else {
            return TaskStatus::InProgress;
        };
        if ResponseFrame::new(&frame).verify_integrity(self.slave) {
            self.response = Some(frame);
            TaskStatus::Complete
        } else {
            self.rejected += 1;
            log::debug!("Slave {}: rejected response {:02X?}", self.slave, frame.as_ref());
            TaskStatus::Failure
        }
    }

    fn retry(&mut self) -> TaskStatus {
        match self.link.resend() {
            Ok(()) => TaskStatus::InProgress,
            Err(e) => {
                log::error!("Resending request to slave {} failed: {}", self.slave, e);
                TaskStatus::Fatal
            }
        }
    }
}

fn exception_or_other(response: &ResponseFrame<'_>, expected: FunctionCode) -> RequestResult {
    if let Some((function, code)) = response.exception() {
        log::debug!("Exception {:#04X} for function {:#04X}", code, function);
        RequestResult::ExceptionResponse
    } else if response.function() != Some(expected.to_byte()) {
        RequestResult::OtherResponse
    } else {
        RequestResult::IncorrectResponseSize
    }
}

/// Registers of a read-holding-registers response for `count` registers
pub fn interpret_read(frame: &[u8], count: u16) -> Result<Vec<u16>, RequestResult> {
    let response = ResponseFrame::new(frame);
    match response.read_registers() {
        Some(regs) if regs.len() == count as usize => Ok(regs),
        Some(_) => Err(RequestResult::IncorrectResponseSize),
        None => Err(exception_or_other(&response, FunctionCode::ReadHoldingRegisters)),
    }
}

/// Check the echo of a write-single-register request
pub fn interpret_write_single(frame: &[u8], address: u16, value: u16) -> Result<(), RequestResult> {
    let response = ResponseFrame::new(frame);
    if response.is_write_reg_response(address, value) {
        return Ok(());
    }
    match exception_or_other(&response, FunctionCode::WriteSingleRegister) {
        RequestResult::IncorrectResponseSize if response.len() == 8 => Err(RequestResult::OtherResponse),
        result => Err(result),
    }
}

/// Check the acknowledgement of a write-multiple-registers request
pub fn interpret_write_multiple(frame: &[u8], start: u16, count: u16) -> Result<(), RequestResult> {
    let response = ResponseFrame::new(frame);
    if response.is_write_regs_response(start, count) {
        return Ok(());
    }
    match exception_or_other(&response, FunctionCode::WriteMultipleRegisters) {
        RequestResult::IncorrectResponseSize if response.len() == 8 => Err(RequestResult::OtherResponse),
        result => Err(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtubus_core::{LineSettings, ManualClock, RetryBudget};
    use rtubus_protocol::Adu;
    use rtubus_protocol::pdu::{read_holding_registers, write_single_register};
    use rtubus_task::RetryableTask;
    use rtubus_transport::MemoryLine;
    use std::time::Duration;

    fn settings() -> LineSettings {
        LineSettings {
            inter_frame_timeout: Duration::from_millis(2),
            ..LineSettings::default()
        }
    }

    #[test]
    fn test_interpret_read() {
        let frame = Adu::encode(2, &[0x03, 0x04, 0x02, 0xBF, 0x02, 0x01]);
        assert_eq!(interpret_read(&frame, 2), Ok(vec![703, 513]));
        assert_eq!(interpret_read(&frame, 3), Err(RequestResult::IncorrectResponseSize));

        let frame = Adu::encode(2, &[0x83, 0x02]);
        assert_eq!(interpret_read(&frame, 2), Err(RequestResult::ExceptionResponse));

        let frame = Adu::encode(2, &write_single_register(4, 1));
        assert_eq!(interpret_read(&frame, 2), Err(RequestResult::OtherResponse));

        let frame = Adu::encode(2, &[0x03, 0x03, 0x02, 0xBF, 0x02]);
        assert_eq!(interpret_read(&frame, 2), Err(RequestResult::IncorrectResponseSize));
    }

    #[test]
    fn test_interpret_writes() {
        let frame = Adu::encode(2, &write_single_register(4, 703));
        assert_eq!(interpret_write_single(&frame, 4, 703), Ok(()));
        assert_eq!(interpret_write_single(&frame, 4, 1), Err(RequestResult::OtherResponse));
        assert_eq!(interpret_write_multiple(&frame, 4, 1), Err(RequestResult::OtherResponse));

        let frame = Adu::encode(2, &[0x10, 0x00, 0x04, 0x00, 0x02]);
        assert_eq!(interpret_write_multiple(&frame, 4, 2), Ok(()));
        let frame = Adu::encode(2, &[0x90, 0x03]);
        assert_eq!(interpret_write_multiple(&frame, 4, 2), Err(RequestResult::ExceptionResponse));
    }

    #[test]
    fn test_broadcast_completes_on_send() {
        let (a, _b) = MemoryLine::pair();
        let clock = ManualClock::new();
        let mut link = MasterLink::new(a, clock.clone(), settings());
        link.begin().unwrap();
        let pdu = write_single_register(4, 1);
        let mut task = RetryableTask::new(
            RegisterRequest::new(&mut link, BROADCAST_ID, pdu),
            clock,
            RetryBudget::default(),
        );
        assert!(task.work());
        assert_eq!(RequestResult::from_status(task.status()), RequestResult::Success);
        assert!(task.into_steps().into_response().is_none());
    }

    #[test]
    fn test_closed_line_is_fatal() {
        let (mut a, _b) = MemoryLine::pair();
        a.end();
        let clock = ManualClock::new();
        let mut link = MasterLink::new(a, clock.clone(), settings());
        let pdu = read_holding_registers(0, 1).unwrap();
        let mut task = RetryableTask::new(RegisterRequest::new(&mut link, 2, pdu), clock, RetryBudget::default());
        assert!(task.work());
        assert_eq!(RequestResult::from_status(task.status()), RequestResult::MasterFailure);
    }

    #[test]
    fn test_corrupt_reply_retried() {
        let (a, mut b) = MemoryLine::pair();
        let clock = ManualClock::new();
        let mut link = MasterLink::new(a, clock.clone(), settings());
        link.begin().unwrap();
        let reply = Adu::encode(2, &[0x03, 0x02, 0x00, 0x07]);
        let mut corrupt = reply.clone();
        corrupt[3] ^= 0x01;

        let budget = RetryBudget::new(3, Duration::from_millis(50));
        let pdu = read_holding_registers(0, 1).unwrap();
        let mut task = RetryableTask::new(RegisterRequest::new(&mut link, 2, pdu), clock.clone(), budget);

        task.work();
        b.write_all(&corrupt).unwrap();
        for _ in 0..5 {
            task.work();
            clock.advance(Duration::from_millis(1));
        }
        assert_eq!(task.attempts(), 2);
        assert_eq!(task.steps().rejected(), 1);

        b.write_all(&reply).unwrap();
        for _ in 0..5 {
            if task.work() {
                break;
            }
            clock.advance(Duration::from_millis(1));
        }
        assert_eq!(task.status(), TaskStatus::Complete);
        let frame = task.into_steps().into_response().unwrap();
        assert_eq!(interpret_read(&frame, 1), Ok(vec![7]));
        assert_eq!(link.statistics().retransmissions, 1);
    }
}
