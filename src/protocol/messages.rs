//! Command codes and typed message payloads
//!
//! # Message Flow
//!
//! ```text
//! Client              Master                      Worker
//!   |                   |                            |
//!   |-- START (0x2N) -->|                            |
//!   |                   |-- SET_TASK (0x01) -------->|
//!   |                   |<------- TASK_ACCEPTED (0x11)|
//!   |                   |                            |
//!   |                   |-- ITERATION_VECTOR (0x02)->|   repeated
//!   |                   |<------ PARTIAL_RESULT (0x12)|   per round
//!   |<-- PROGRESS ------|                            |
//!   |                   |                            |
//!   |                   |-- RESET (0x03) ----------->|
//!   |<-- RESULT_READY --|                            |
//! ```

use super::payload::{get_count, PayloadError, PayloadReader, PayloadWriter};
use crate::compute::SolveMode;
use crate::linalg::{DenseMatrix, RowRange};

/// Protocol command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    // Master -> Worker
    SetTask = 0x01,
    IterationVector = 0x02,
    Reset = 0x03,

    // Worker -> Master
    TaskAccepted = 0x11,
    PartialResult = 0x12,
    WorkerError = 0xFE,

    // Client -> Master
    StartDistributed = 0x21,
    StartGaussLinear = 0x22,
    StartSeidelSequential = 0x23,
    StartSeidelDataParallel = 0x24,
    StartSeidelManualThreads = 0x25,
    StartSeidelTaskFanOut = 0x26,
    RequestPoolState = 0x2F,

    // Master -> Client
    Status = 0x31,
    WorkerStatus = 0x32,
    Progress = 0x33,
    ResultReady = 0x34,
    Log = 0x35,
    LinearResultReady = 0x36,
    PoolState = 0x37,
    CalculationFailed = 0x3F,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let cmd = match byte {
            0x01 => Command::SetTask,
            0x02 => Command::IterationVector,
            0x03 => Command::Reset,
            0x11 => Command::TaskAccepted,
            0x12 => Command::PartialResult,
            0xFE => Command::WorkerError,
            0x21 => Command::StartDistributed,
            0x22 => Command::StartGaussLinear,
            0x23 => Command::StartSeidelSequential,
            0x24 => Command::StartSeidelDataParallel,
            0x25 => Command::StartSeidelManualThreads,
            0x26 => Command::StartSeidelTaskFanOut,
            0x2F => Command::RequestPoolState,
            0x31 => Command::Status,
            0x32 => Command::WorkerStatus,
            0x33 => Command::Progress,
            0x34 => Command::ResultReady,
            0x35 => Command::Log,
            0x36 => Command::LinearResultReady,
            0x37 => Command::PoolState,
            0x3F => Command::CalculationFailed,
            _ => return None,
        };
        Some(cmd)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether the start payload begins with the `isDistributed` flag
    ///
    /// The plain distributed command predates the flag and omits it.
    pub fn start_has_flag(self) -> bool {
        matches!(
            self,
            Command::StartGaussLinear
                | Command::StartSeidelSequential
                | Command::StartSeidelDataParallel
                | Command::StartSeidelManualThreads
                | Command::StartSeidelTaskFanOut
        )
    }

    pub fn is_start(self) -> bool {
        self == Command::StartDistributed || self.start_has_flag()
    }

    /// Sweep strategy selected by a Seidel start command
    pub fn seidel_mode(self) -> Option<SolveMode> {
        match self {
            Command::StartSeidelSequential => Some(SolveMode::Sequential),
            Command::StartSeidelDataParallel => Some(SolveMode::DataParallel),
            Command::StartSeidelManualThreads => Some(SolveMode::ManualThreads),
            Command::StartSeidelTaskFanOut => Some(SolveMode::TaskFanOut),
            _ => None,
        }
    }

    /// Seidel start command for a sweep strategy
    pub fn seidel_start(mode: SolveMode) -> Self {
        match mode {
            SolveMode::Sequential => Command::StartSeidelSequential,
            SolveMode::DataParallel => Command::StartSeidelDataParallel,
            SolveMode::ManualThreads => Command::StartSeidelManualThreads,
            SolveMode::TaskFanOut => Command::StartSeidelTaskFanOut,
        }
    }
}

/// Parameters of a client start command
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    pub is_distributed: bool,
    pub matrix_file: String,
    pub vector_file: String,
    pub nodes_file: String,
    pub epsilon: f64,
    pub max_iterations: i32,
}

impl StartRequest {
    pub fn encode(&self, with_flag: bool) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        if with_flag {
            w.put_bool(self.is_distributed);
        }
        w.put_str(&self.matrix_file)
            .put_str(&self.vector_file)
            .put_str(&self.nodes_file)
            .put_f64(self.epsilon)
            .put_i32(self.max_iterations);
        w.finish()
    }

    /// Decode a start payload; without the flag the request counts as distributed
    pub fn decode(payload: &[u8], with_flag: bool) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(payload);
        let is_distributed = if with_flag { r.get_bool()? } else { true };
        Ok(Self {
            is_distributed,
            matrix_file: r.get_str()?,
            vector_file: r.get_str()?,
            nodes_file: r.get_str()?,
            epsilon: r.get_f64()?,
            max_iterations: r.get_i32()?,
        })
    }
}

/// Row block handed to one worker
#[derive(Debug, Clone, PartialEq)]
pub struct TaskAssignment {
    pub start_row: usize,
    pub row_count: usize,
    pub matrix_size: usize,
    /// `row_count * matrix_size` coefficients, row-major
    pub matrix: Vec<f64>,
    pub b: Vec<f64>,
}

impl TaskAssignment {
    /// Encode rows `range` of `a` and `b` without copying them into a struct first
    pub fn encode_rows(a: &DenseMatrix, b: &[f64], range: RowRange) -> Vec<u8> {
        let n = a.size();
        let mut w = PayloadWriter::with_capacity(12 + range.count * (n + 1) * 8);
        w.put_i32(range.start as i32)
            .put_i32(range.count as i32)
            .put_i32(n as i32);
        for row in range.rows() {
            w.put_f64_slice(a.row(row)).put_f64(b[row]);
        }
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(payload);
        let start_row = get_count(&mut r)?;
        let row_count = get_count(&mut r)?;
        let matrix_size = get_count(&mut r)?;
        if matrix_size == 0 || start_row.checked_add(row_count).map_or(true, |end| end > matrix_size) {
            return Err(PayloadError::RowsOutOfRange {
                start: start_row,
                count: row_count,
                size: matrix_size,
            });
        }

        let expected = row_count
            .checked_mul(matrix_size + 1)
            .and_then(|v| v.checked_mul(8))
            .ok_or(PayloadError::InvalidLength(row_count as i64))?;
        if r.remaining() != expected {
            return Err(PayloadError::UnexpectedLength {
                what: "task assignment",
                expected,
                actual: r.remaining(),
            });
        }

        let mut matrix = Vec::with_capacity(row_count * matrix_size);
        let mut b = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            matrix.extend(r.get_f64_vec(matrix_size)?);
            b.push(r.get_f64()?);
        }

        Ok(Self { start_row, row_count, matrix_size, matrix, b })
    }
}

/// Current solution estimate broadcast every round
#[derive(Debug, Clone, PartialEq)]
pub struct IterationVector {
    /// Solve mode byte, absent when the sender predates modes
    pub mode: Option<u8>,
    pub x: Vec<f64>,
}

impl IterationVector {
    pub fn encode(mode: u8, x: &[f64]) -> Vec<u8> {
        let mut w = PayloadWriter::with_capacity(1 + x.len() * 8);
        w.put_u8(mode).put_f64_slice(x);
        w.finish()
    }

    /// The mode byte is present exactly when the length is one more than a multiple of 8
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(payload);
        let mode = if payload.len() % 8 == 1 { Some(r.get_u8()?) } else { None };
        Ok(Self { mode, x: r.get_f64_rest()? })
    }
}

/// Rows computed by one worker in one round
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult {
    pub used_threads: Option<i32>,
    pub values: Vec<f64>,
}

impl PartialResult {
    pub fn encode(used_threads: i32, values: &[f64]) -> Vec<u8> {
        let mut w = PayloadWriter::with_capacity(4 + values.len() * 8);
        w.put_i32(used_threads).put_f64_slice(values);
        w.finish()
    }

    /// The thread count is present exactly when the length is 4 past a multiple of 8
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(payload);
        let used_threads = if payload.len() % 8 == 4 { Some(r.get_i32()?) } else { None };
        Ok(Self { used_threads, values: r.get_f64_rest()? })
    }
}

/// Final iterative solution
#[derive(Debug, Clone, PartialEq)]
pub struct ResultReady {
    pub elapsed_ms: i64,
    pub iterations: i32,
    pub matrix_size: i32,
    pub resources: Option<i32>,
    pub x: Vec<f64>,
}

impl ResultReady {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::with_capacity(28 + self.x.len() * 8);
        w.put_i64(self.elapsed_ms)
            .put_i32(self.iterations)
            .put_i32(self.matrix_size);
        if let Some(resources) = self.resources {
            w.put_i32(resources);
        }
        w.put_i32(self.x.len() as i32).put_f64_slice(&self.x);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(payload);
        let elapsed_ms = r.get_i64()?;
        let iterations = r.get_i32()?;
        let matrix_size = r.get_i32()?;
        // With resources: 4 + 4 + 8k bytes left; without: 4 + 8k
        let resources = if r.remaining() % 8 == 0 { Some(r.get_i32()?) } else { None };
        let len = get_count(&mut r)?;
        let x = r.get_f64_vec(len)?;
        Ok(Self { elapsed_ms, iterations, matrix_size, resources, x })
    }
}

/// Timing of a direct solve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearResult {
    pub elapsed_ms: i64,
    /// Always -1, a direct solve has no iterations
    pub iterations: i32,
    pub matrix_size: i32,
}

impl LinearResult {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::with_capacity(16);
        w.put_i64(self.elapsed_ms).put_i32(self.iterations).put_i32(self.matrix_size);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            elapsed_ms: r.get_i64()?,
            iterations: r.get_i32()?,
            matrix_size: r.get_i32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub iteration: i32,
    pub error: f64,
}

impl Progress {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::with_capacity(12);
        w.put_i32(self.iteration).put_f64(self.error);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self { iteration: r.get_i32()?, error: r.get_f64()? })
    }
}

/// Pool occupancy as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolState {
    pub available: i32,
    pub total: i32,
}

impl PoolState {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::with_capacity(8);
        w.put_i32(self.available).put_i32(self.total);
        w.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self { available: r.get_i32()?, total: r.get_i32()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_start() -> StartRequest {
        StartRequest {
            is_distributed: false,
            matrix_file: "/data/A.txt".to_string(),
            vector_file: "/data/b.txt".to_string(),
            nodes_file: "/data/nodes.txt".to_string(),
            epsilon: 1e-6,
            max_iterations: 500,
        }
    }

    #[test]
    fn test_command_codes() {
        for byte in 0u8..=255 {
            if let Some(cmd) = Command::from_byte(byte) {
                assert_eq!(cmd.code(), byte);
            }
        }
        assert_eq!(Command::from_byte(0x40), None);
        assert!(Command::StartDistributed.is_start());
        assert!(!Command::StartDistributed.start_has_flag());
        assert!(Command::StartSeidelTaskFanOut.start_has_flag());
        assert!(!Command::RequestPoolState.is_start());
    }

    #[test]
    fn test_seidel_commands() {
        for mode in SolveMode::ALL {
            let command = Command::seidel_start(mode);
            assert!(command.start_has_flag());
            assert_eq!(command.seidel_mode(), Some(mode));
        }
        assert_eq!(Command::StartDistributed.seidel_mode(), None);
        assert_eq!(Command::StartGaussLinear.seidel_mode(), None);
    }

    #[test]
    fn test_start_request_with_flag() {
        let req = sample_start();
        let bytes = req.encode(true);
        assert_eq!(bytes[0], 0);
        assert_eq!(StartRequest::decode(&bytes, true).unwrap(), req);
    }

    #[test]
    fn test_start_request_without_flag() {
        let req = sample_start();
        let decoded = StartRequest::decode(&req.encode(false), false).unwrap();
        assert!(decoded.is_distributed);
        assert_eq!(decoded.matrix_file, req.matrix_file);
        assert_eq!(decoded.max_iterations, 500);
    }

    #[test]
    fn test_task_assignment_layout() {
        let a = DenseMatrix::from_rows(vec![vec![5.0, 2.0], vec![1.0, 3.0]]).unwrap();
        let b = [19.0, 9.0];
        let bytes = TaskAssignment::encode_rows(&a, &b, RowRange { start: 1, count: 1 });
        assert_eq!(bytes.len(), 12 + 3 * 8);

        let task = TaskAssignment::decode(&bytes).unwrap();
        assert_eq!(task.start_row, 1);
        assert_eq!(task.row_count, 1);
        assert_eq!(task.matrix_size, 2);
        assert_eq!(task.matrix, vec![1.0, 3.0]);
        assert_eq!(task.b, vec![9.0]);
    }

    #[test]
    fn test_task_assignment_rejects_wrong_length() {
        let a = DenseMatrix::from_rows(vec![vec![5.0, 2.0], vec![1.0, 3.0]]).unwrap();
        let mut bytes = TaskAssignment::encode_rows(&a, &[19.0, 9.0], RowRange { start: 0, count: 2 });
        bytes.truncate(bytes.len() - 8);
        assert!(matches!(
            TaskAssignment::decode(&bytes),
            Err(PayloadError::UnexpectedLength { .. })
        ));
    }

    #[test]
    fn test_task_assignment_rejects_rows_outside_system() {
        let mut w = PayloadWriter::new();
        w.put_i32(5).put_i32(1).put_i32(2).put_f64_slice(&[1.0, 3.0, 9.0]);
        assert_eq!(
            TaskAssignment::decode(&w.finish()),
            Err(PayloadError::RowsOutOfRange { start: 5, count: 1, size: 2 })
        );

        let mut w = PayloadWriter::new();
        w.put_i32(0).put_i32(0).put_i32(0);
        assert!(matches!(
            TaskAssignment::decode(&w.finish()),
            Err(PayloadError::RowsOutOfRange { size: 0, .. })
        ));
    }

    #[test]
    fn test_iteration_vector_mode_detection() {
        let with_mode = IterationVector::decode(&IterationVector::encode(2, &[1.0, 2.0])).unwrap();
        assert_eq!(with_mode.mode, Some(2));
        assert_eq!(with_mode.x, vec![1.0, 2.0]);

        let mut w = PayloadWriter::new();
        w.put_f64_slice(&[4.0]);
        let bare = IterationVector::decode(&w.finish()).unwrap();
        assert_eq!(bare.mode, None);
        assert_eq!(bare.x, vec![4.0]);
    }

    #[test]
    fn test_partial_result_thread_detection() {
        let with_threads = PartialResult::decode(&PartialResult::encode(8, &[3.8])).unwrap();
        assert_eq!(with_threads.used_threads, Some(8));
        assert_eq!(with_threads.values, vec![3.8]);

        let mut w = PayloadWriter::new();
        w.put_f64_slice(&[3.8, 3.0]);
        let bare = PartialResult::decode(&w.finish()).unwrap();
        assert_eq!(bare.used_threads, None);
        assert_eq!(bare.values.len(), 2);
    }

    #[test]
    fn test_result_ready_optional_resources() {
        let full = ResultReady {
            elapsed_ms: 1200,
            iterations: 17,
            matrix_size: 3,
            resources: Some(4),
            x: vec![1.0, 2.0, 3.0],
        };
        assert_eq!(ResultReady::decode(&full.encode()).unwrap(), full);

        let bare = ResultReady { resources: None, ..full.clone() };
        assert_eq!(ResultReady::decode(&bare.encode()).unwrap(), bare);
    }

    #[test]
    fn test_small_messages() {
        let p = Progress { iteration: 10, error: 0.25 };
        assert_eq!(Progress::decode(&p.encode()).unwrap(), p);

        let s = PoolState { available: 2, total: 5 };
        assert_eq!(s.encode().len(), 8);
        assert_eq!(PoolState::decode(&s.encode()).unwrap(), s);

        let l = LinearResult { elapsed_ms: 35, iterations: -1, matrix_size: 100 };
        assert_eq!(LinearResult::decode(&l.encode()).unwrap(), l);
    }
}
