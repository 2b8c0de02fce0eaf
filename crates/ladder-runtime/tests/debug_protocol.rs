use std::sync::Mutex;

use ladder_runtime::debug::{process_frame, ByteOrder, DebugTarget, MAX_DEBUG_FRAME};

/// In-memory stand-in for a loaded program.
struct FakeProgram {
    variables: Mutex<Vec<Vec<u8>>>,
    traces: Mutex<Vec<(u16, bool, Option<Vec<u8>>)>>,
    byte_order: Mutex<Option<ByteOrder>>,
    md5: String,
}

impl FakeProgram {
    fn new(variables: Vec<Vec<u8>>) -> Self {
        Self {
            variables: Mutex::new(variables),
            traces: Mutex::new(Vec::new()),
            byte_order: Mutex::new(None),
            md5: "abcdef1234567890123456789012345678".to_string(),
        }
    }
}

impl DebugTarget for FakeProgram {
    fn variable_count(&self) -> Option<u16> {
        Some(self.variables.lock().unwrap().len() as u16)
    }

    fn variable_bytes(&self, index: u16) -> Option<Vec<u8>> {
        self.variables.lock().unwrap().get(index as usize).cloned()
    }

    fn set_trace(&self, index: u16, force: bool, value: Option<&[u8]>) -> bool {
        self.traces
            .lock()
            .unwrap()
            .push((index, force, value.map(<[u8]>::to_vec)));
        true
    }

    fn set_endianness(&self, order: ByteOrder) -> bool {
        *self.byte_order.lock().unwrap() = Some(order);
        true
    }

    fn md5(&self) -> Option<String> {
        Some(self.md5.clone())
    }
}

/// A program compiled without the debug symbol set.
struct NoDebugProgram;

impl DebugTarget for NoDebugProgram {
    fn variable_count(&self) -> Option<u16> {
        None
    }
    fn variable_bytes(&self, _index: u16) -> Option<Vec<u8>> {
        None
    }
    fn set_trace(&self, _index: u16, _force: bool, _value: Option<&[u8]>) -> bool {
        false
    }
    fn set_endianness(&self, _order: ByteOrder) -> bool {
        false
    }
    fn md5(&self) -> Option<String> {
        None
    }
}

fn run(target: &dyn DebugTarget, tick: u32, request: &[u8]) -> (usize, Vec<u8>) {
    let mut frame = vec![0u8; MAX_DEBUG_FRAME];
    frame[..request.len()].copy_from_slice(request);
    let len = process_frame(target, tick, &mut frame, request.len());
    (len, frame)
}

#[test]
fn info_reports_variable_count() {
    let program = FakeProgram::new(vec![vec![0]; 300]);
    let (len, frame) = run(&program, 0, &[0x41]);
    assert_eq!(len, 3);
    assert_eq!(&frame[..3], &[0x41, 0x01, 0x2C]);
}

#[test]
fn set_records_trace_and_value() {
    let program = FakeProgram::new(vec![vec![0, 0]; 4]);
    let request = [0x42, 0x00, 0x02, 0x01, 0x00, 0x02, 0xAB, 0xCD];
    let (len, frame) = run(&program, 0, &request);
    assert_eq!(len, 2);
    assert_eq!(&frame[..2], &[0x42, 0x7E]);
    let traces = program.traces.lock().unwrap();
    assert_eq!(traces.as_slice(), &[(2, true, Some(vec![0xAB, 0xCD]))]);
}

#[test]
fn set_rejects_out_of_range_index() {
    let program = FakeProgram::new(vec![vec![0]; 4]);
    let (len, frame) = run(&program, 0, &[0x42, 0x00, 0x04, 0x00, 0x00, 0x00]);
    assert_eq!(len, 2);
    assert_eq!(&frame[..2], &[0x42, 0x81]);
    assert!(program.traces.lock().unwrap().is_empty());
}

#[test]
fn set_without_value_passes_none() {
    let program = FakeProgram::new(vec![vec![0]; 4]);
    let (len, frame) = run(&program, 0, &[0x42, 0x00, 0x01, 0x00]);
    assert_eq!(len, 2);
    assert_eq!(&frame[..2], &[0x42, 0x7E]);
    let traces = program.traces.lock().unwrap();
    assert_eq!(traces.as_slice(), &[(1, false, None)]);
}

#[test]
fn get_copies_values_with_header() {
    let program = FakeProgram::new(vec![vec![1], vec![2, 2], vec![3, 3, 3, 3]]);
    let (len, frame) = run(&program, 0x01020304, &[0x43, 0x00, 0x00, 0x00, 0x02]);
    assert_eq!(len, 17);
    // fc, status, last index, tick, payload size.
    assert_eq!(&frame[..2], &[0x43, 0x7E]);
    assert_eq!(&frame[2..4], &[0x00, 0x02]);
    assert_eq!(&frame[4..8], &[0x01, 0x02, 0x03, 0x04]);
    assert_eq!(&frame[8..10], &[0x00, 0x07]);
    assert_eq!(&frame[10..17], &[1, 2, 2, 3, 3, 3, 3]);
}

#[test]
fn get_rejects_bad_ranges() {
    let program = FakeProgram::new(vec![vec![1]; 3]);
    for request in [
        [0x43, 0x00, 0x03, 0x00, 0x03], // start out of range
        [0x43, 0x00, 0x00, 0x00, 0x03], // end out of range
        [0x43, 0x00, 0x02, 0x00, 0x01], // start > end
    ] {
        let (len, frame) = run(&program, 0, &request);
        assert_eq!(len, 2);
        assert_eq!(&frame[..2], &[0x43, 0x81]);
    }
}

#[test]
fn get_stops_before_overflowing_the_frame() {
    let program = FakeProgram::new(vec![vec![0xAA; 3000], vec![0xBB; 3000]]);
    let (len, frame) = run(&program, 0, &[0x43, 0x00, 0x00, 0x00, 0x01]);
    // Only the first variable fits alongside the ten-byte header.
    assert_eq!(len, 10 + 3000);
    assert_eq!(&frame[2..4], &[0x00, 0x00]);
    assert_eq!(&frame[8..10], &(3000u16).to_be_bytes());
}

#[test]
fn get_list_returns_requested_values() {
    let program = FakeProgram::new(vec![vec![1], vec![2], vec![3]]);
    let (len, frame) = run(
        &program,
        7,
        &[0x44, 0x00, 0x03, 0x00, 0x02, 0x00, 0x00, 0x00, 0x02],
    );
    assert_eq!(len, 13);
    assert_eq!(&frame[..2], &[0x44, 0x7E]);
    assert_eq!(&frame[2..4], &[0x00, 0x02]);
    assert_eq!(&frame[4..8], &7u32.to_be_bytes());
    assert_eq!(&frame[8..10], &[0x00, 0x03]);
    assert_eq!(&frame[10..13], &[3, 1, 3]);
}

#[test]
fn get_list_rejects_out_of_range_index() {
    // Variable count is 3; index 0xFFFF is out of range.
    let program = FakeProgram::new(vec![vec![1], vec![2], vec![3]]);
    let (len, frame) = run(&program, 0, &[0x44, 0x00, 0x01, 0xFF, 0xFF]);
    assert_eq!(len, 2);
    assert_eq!(&frame[..2], &[0x44, 0x81]);
}

#[test]
fn get_list_rejects_oversized_requests() {
    let program = FakeProgram::new(vec![vec![1]; 3]);
    let (len, frame) = run(&program, 0, &[0x44, 0x01, 0x01]);
    assert_eq!(len, 2);
    assert_eq!(&frame[..2], &[0x44, 0x82]);
}

#[test]
fn md5_probe_selects_same_order() {
    let program = FakeProgram::new(vec![vec![1]]);
    let (len, frame) = run(&program, 0, &[0x45, 0xDE, 0xAD]);
    assert_eq!(len, 2 + 32 + 1);
    assert_eq!(&frame[..2], &[0x45, 0x7E]);
    assert_eq!(&frame[2..34], program.md5.as_bytes());
    assert_eq!(frame[34], 0x00);
    assert_eq!(*program.byte_order.lock().unwrap(), Some(ByteOrder::Same));
}

#[test]
fn md5_probe_selects_reversed_order() {
    let program = FakeProgram::new(vec![vec![1]]);
    let (len, _) = run(&program, 0, &[0x45, 0xAD, 0xDE]);
    assert_eq!(len, 35);
    assert_eq!(
        *program.byte_order.lock().unwrap(),
        Some(ByteOrder::Reversed)
    );
}

#[test]
fn md5_rejects_unknown_probe() {
    let program = FakeProgram::new(vec![vec![1]]);
    let (len, frame) = run(&program, 0, &[0x45, 0x00, 0x00]);
    assert_eq!(len, 2);
    assert_eq!(&frame[..2], &[0x45, 0x81]);
    assert!(program.byte_order.lock().unwrap().is_none());
}

#[test]
fn unknown_function_code_yields_empty_response() {
    let program = FakeProgram::new(vec![vec![1]]);
    let (len, _) = run(&program, 0, &[0x99, 0x01]);
    assert_eq!(len, 0);
}

#[test]
fn unbound_debug_symbols_yield_empty_responses() {
    for request in [&[0x41][..], &[0x43, 0, 0, 0, 0], &[0x45, 0xDE, 0xAD]] {
        let (len, _) = run(&NoDebugProgram, 0, request);
        assert_eq!(len, 0);
    }
}
