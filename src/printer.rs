//! The registered-message formatter fed by internal `PRINT_MESSAGE`/
//! `MODIFY_TASK_VAL` tasks (spec component "C5").
//!
//! Grounded in `original_source/src/Python/tools/scheduler/printer.py`'s
//! `SchedulerPrinter`/`_TaskPrinter`: a host registers, per `(task_type,
//! task_id)`, a name and an ordered list of named variable slots; each such
//! task-printer maps `msg_num -> (format string, silenced flag)`. This is
//! not a general logger -- it exists to keep wire traffic down by sending a
//! message *number* instead of a formatted string, and rendering the
//! string on the host side.

use std::collections::HashMap;
use std::fmt::Write as _;

use log::warn;
use thiserror::Error;

use crate::packet::TaskType;

/// The closed set of packed-value type codes `MODIFY_TASK_VAL` may carry
/// (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    Bool,
    Char,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F16,
    F32,
    F64,
    Isize,
    Usize,
}

impl TypeCode {
    fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            b'?' => TypeCode::Bool,
            b'c' => TypeCode::Char,
            b'b' => TypeCode::I8,
            b'B' => TypeCode::U8,
            b'h' => TypeCode::I16,
            b'H' => TypeCode::U16,
            b'i' => TypeCode::I32,
            b'I' => TypeCode::U32,
            b'q' => TypeCode::I64,
            b'Q' => TypeCode::U64,
            b'e' => TypeCode::F16,
            b'f' => TypeCode::F32,
            b'd' => TypeCode::F64,
            b'n' => TypeCode::Isize,
            b'N' => TypeCode::Usize,
            _ => return None,
        })
    }

    /// Width in bytes of the packed value this type code carries, used to
    /// validate `MODIFY_TASK_VAL`'s trailing value bytes. `F16` and
    /// fixed-width integers have an obvious size; `Isize`/`Usize` are
    /// platform pointer width on the MCU side, which this host treats as
    /// 4 bytes (the only width the reference firmware targets in this
    /// exercise).
    fn byte_width(self) -> usize {
        match self {
            TypeCode::Bool | TypeCode::Char | TypeCode::I8 | TypeCode::U8 => 1,
            TypeCode::I16 | TypeCode::U16 | TypeCode::F16 => 2,
            TypeCode::I32 | TypeCode::U32 | TypeCode::F32 | TypeCode::Isize | TypeCode::Usize => 4,
            TypeCode::I64 | TypeCode::U64 | TypeCode::F64 => 8,
        }
    }
}

/// A value unpacked from a `MODIFY_TASK_VAL` payload, formatted on demand
/// for message substitution.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Char(u8),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{}", *v as char),
            Value::I8(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
        }
    }
}

fn unpack(type_code: TypeCode, bytes: &[u8], little_endian: bool) -> Option<Value> {
    macro_rules! from_bytes {
        ($t:ty, $n:literal) => {{
            let arr: [u8; $n] = bytes.try_into().ok()?;
            Some(if little_endian {
                <$t>::from_le_bytes(arr)
            } else {
                <$t>::from_be_bytes(arr)
            })
        }};
    }

    match type_code {
        TypeCode::Bool => Some(Value::Bool(*bytes.first()? != 0)),
        TypeCode::Char => Some(Value::Char(*bytes.first()?)),
        TypeCode::I8 => Some(Value::I8(*bytes.first()? as i8)),
        TypeCode::U8 => Some(Value::U8(*bytes.first()?)),
        TypeCode::I16 => from_bytes!(i16, 2).map(Value::I16),
        TypeCode::U16 => from_bytes!(u16, 2).map(Value::U16),
        TypeCode::I32 | TypeCode::Isize => from_bytes!(i32, 4).map(Value::I32),
        TypeCode::U32 | TypeCode::Usize => from_bytes!(u32, 4).map(Value::U32),
        TypeCode::I64 => from_bytes!(i64, 8).map(Value::I64),
        TypeCode::U64 => from_bytes!(u64, 8).map(Value::U64),
        TypeCode::F32 => from_bytes!(f32, 4).map(Value::F32),
        TypeCode::F64 => from_bytes!(f64, 8).map(Value::F64),
        // f16 has no stable std representation; store its raw bits widened
        // into an f32-sized slot is out of scope -- surface it as U16 bits
        // instead, which is enough for substitution/logging purposes.
        TypeCode::F16 => from_bytes!(u16, 2).map(Value::U16),
    }
}

#[derive(Debug, Error)]
pub enum PrinterError {
    #[error("no task printer registered for ({0:?}, task {1})")]
    NotRegistered(TaskType, u8),
    #[error("message number {0} already registered for this task")]
    MessageAlreadyRegistered(u32),
    #[error("variable id {var_id} out of range (task has {var_count} variables)")]
    VariableOutOfRange { var_id: u8, var_count: usize },
    #[error("unrecognized MODIFY_TASK_VAL type code byte {0:#x}")]
    UnknownTypeCode(u8),
    #[error("value payload of {actual} bytes doesn't match the {expected}-byte width for this type code")]
    ValueWidthMismatch { expected: usize, actual: usize },
}

struct TaskPrinter {
    name: String,
    vars: Vec<String>,
    values: Vec<Option<Value>>,
    messages: HashMap<u32, (String, bool)>,
}

impl TaskPrinter {
    fn new(name: impl Into<String>, vars: Vec<String>) -> Self {
        let count = vars.len();
        Self {
            name: name.into(),
            vars,
            values: std::iter::repeat_with(|| None).take(count).collect(),
            messages: HashMap::new(),
        }
    }

    fn register_message(&mut self, msg_num: u32, format: impl Into<String>) -> Result<(), PrinterError> {
        if self.messages.contains_key(&msg_num) {
            return Err(PrinterError::MessageAlreadyRegistered(msg_num));
        }
        self.messages.insert(msg_num, (format.into(), false));
        Ok(())
    }

    fn set_message_silenced(&mut self, msg_num: u32, silenced: bool) {
        if let Some(entry) = self.messages.get_mut(&msg_num) {
            entry.1 = silenced;
        }
    }

    fn update_var(&mut self, var_id: u8, value: Value) -> Result<(), PrinterError> {
        let idx = var_id as usize;
        if idx >= self.vars.len() {
            return Err(PrinterError::VariableOutOfRange {
                var_id,
                var_count: self.vars.len(),
            });
        }
        self.values[idx] = Some(value);
        Ok(())
    }

    fn render(&self, msg_num: u32) -> Option<String> {
        let (format, silenced) = self.messages.get(&msg_num)?;
        if *silenced {
            return Some(String::new());
        }
        let mut rendered = format.clone();
        for (name, value) in self.vars.iter().zip(self.values.iter()) {
            if let Some(value) = value {
                let mut substituted = String::new();
                let _ = write!(substituted, "{value}");
                rendered = rendered.replace(&format!("{{{name}}}"), &substituted);
            }
        }
        Some(rendered)
    }
}

/// Internal task ids that get a built-in task printer at construction time
/// (spec §4.6, `_set_up_internal_task_printers` in the reference).
mod internal_ids {
    pub const ALERT_SYSTEM: u8 = 0;
    pub const PRINT_MESSAGE: u8 = 1;
    pub const UNSCHEDULE_TASK: u8 = 2;
    pub const MODIFY_TASK_VAL: u8 = 3;
    pub const PKT_DECODE: u8 = 4;
    pub const PKT_ENCODE: u8 = 5;
    pub const TASK_LOOKUP: u8 = 6;
    pub const TASK_REGISTER: u8 = 7;
}

/// Diagnostic message numbers registered under the built-in `PKT_DECODE`
/// task printer, one per failure kind in spec §7's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DecodeDiagnostic {
    FrameInvalid = 0,
    ShortHeader = 1,
    CrcFail = 2,
    UnknownTask = 3,
    SizeMismatch = 4,
}

/// Whichever of the built-in `PKT_DECODE` task printer's
/// `expected_size`/`received_size`/`task_number` variable slots a given
/// decode failure actually carries. `FrameInvalid`/`ShortHeader`/
/// `CrcFail` have nothing to report (`Default::default()`); `UnknownTask`
/// fills in `task_number`; `SizeMismatch` fills in all three.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeDiagnosticDetail {
    pub expected_size: Option<i32>,
    pub received_size: Option<usize>,
    pub task_number: Option<u8>,
}

/// Printer: the formatter fed by internal `PRINT_MESSAGE`/`MODIFY_TASK_VAL`
/// tasks, plus the diagnostics channel every discard path in the scheduler
/// routes through (spec §7).
pub struct Printer {
    little_endian: bool,
    task_printers: HashMap<(TaskType, u8), TaskPrinter>,
}

impl Printer {
    pub fn new(little_endian: bool) -> Self {
        let mut printer = Self {
            little_endian,
            task_printers: HashMap::new(),
        };
        printer.register_internal_task_printers();
        printer
    }

    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    fn register_internal_task_printers(&mut self) {
        use internal_ids::*;
        let table: &[(u8, &str, &[&str])] = &[
            (ALERT_SYSTEM, "ALERT SYSTEM", &[]),
            (PRINT_MESSAGE, "PRINT MESSAGE", &[]),
            (UNSCHEDULE_TASK, "UNSCHEDULE TASK", &[]),
            (MODIFY_TASK_VAL, "MODIFY PRINTER VARS", &[]),
            (
                PKT_DECODE,
                "PKT DECODE",
                &["expected_size", "received_size", "task_number"],
            ),
            (PKT_ENCODE, "PKT ENCODE", &[]),
            (TASK_LOOKUP, "TASK LOOKUP", &[]),
            (TASK_REGISTER, "TASK REGISTER", &[]),
        ];

        for (id, name, vars) in table {
            self.register_task(
                TaskType::Internal,
                *id,
                name,
                vars.iter().map(|v| v.to_string()).collect(),
            )
            .expect("internal task printer ids are distinct");
        }

        self.register_message(TaskType::Internal, internal_ids::PKT_DECODE, DecodeDiagnostic::ShortHeader as u32, "short encoded header size")
            .expect("registered above");
        self.register_message(TaskType::Internal, internal_ids::PKT_DECODE, DecodeDiagnostic::FrameInvalid as u32, "COBS frame invalid")
            .expect("registered above");
        self.register_message(TaskType::Internal, internal_ids::PKT_DECODE, DecodeDiagnostic::CrcFail as u32, "crc16 checksum fail")
            .expect("registered above");
        self.register_message(
            TaskType::Internal,
            internal_ids::PKT_DECODE,
            DecodeDiagnostic::UnknownTask as u32,
            "task {task_number} was not registered",
        )
        .expect("registered above");
        self.register_message(
            TaskType::Internal,
            internal_ids::PKT_DECODE,
            DecodeDiagnostic::SizeMismatch as u32,
            "expected {expected_size} byte(s) but received {received_size} byte(s) for task {task_number}",
        )
        .expect("registered above");
    }

    /// Registers a task printer entry: a name and an ordered list of named
    /// variable slots `MODIFY_TASK_VAL` can later fill in.
    pub fn register_task(
        &mut self,
        task_type: TaskType,
        task_id: u8,
        name: impl Into<String>,
        vars: Vec<String>,
    ) -> Result<(), PrinterError> {
        self.task_printers
            .insert((task_type, task_id), TaskPrinter::new(name, vars));
        Ok(())
    }

    pub fn register_message(
        &mut self,
        task_type: TaskType,
        task_id: u8,
        msg_num: u32,
        format: impl Into<String>,
    ) -> Result<(), PrinterError> {
        let printer = self
            .task_printers
            .get_mut(&(task_type, task_id))
            .ok_or(PrinterError::NotRegistered(task_type, task_id))?;
        printer.register_message(msg_num, format)
    }

    pub fn set_message_silenced(&mut self, task_type: TaskType, task_id: u8, msg_num: u32, silenced: bool) {
        if let Some(printer) = self.task_printers.get_mut(&(task_type, task_id)) {
            printer.set_message_silenced(msg_num, silenced);
        }
    }

    /// Handles an internal `PRINT_MESSAGE` payload: `(task_id, task_type,
    /// msg_num)`.
    pub fn print_task_message(&self, task_id: u8, task_type: TaskType, msg_num: u32, device_name: Option<&str>) {
        let Some(printer) = self.task_printers.get(&(task_type, task_id)) else {
            warn!("printer: no task registered for message from task {task_id} ({task_type:?})");
            return;
        };
        match printer.render(msg_num) {
            Some(rendered) if !rendered.is_empty() => {
                if let Some(device_name) = device_name {
                    println!("[{device_name}] {rendered}");
                } else {
                    println!("{rendered}");
                }
            }
            Some(_) => {} // silenced
            None => warn!(
                "printer: unregistered message {msg_num} for task {task_id} ({})",
                printer.name
            ),
        }
    }

    /// Handles an internal `MODIFY_TASK_VAL` payload: `(task_id, task_type,
    /// var_id, type_code, packed_value)`.
    pub fn modify_task_value(
        &mut self,
        task_id: u8,
        task_type: TaskType,
        var_id: u8,
        type_code_byte: u8,
        packed_value: &[u8],
    ) -> Result<(), PrinterError> {
        let type_code =
            TypeCode::from_byte(type_code_byte).ok_or(PrinterError::UnknownTypeCode(type_code_byte))?;

        if packed_value.len() != type_code.byte_width() {
            return Err(PrinterError::ValueWidthMismatch {
                expected: type_code.byte_width(),
                actual: packed_value.len(),
            });
        }

        let value = unpack(type_code, packed_value, self.little_endian)
            .ok_or(PrinterError::ValueWidthMismatch {
                expected: type_code.byte_width(),
                actual: packed_value.len(),
            })?;

        let printer = self
            .task_printers
            .get_mut(&(task_type, task_id))
            .ok_or(PrinterError::NotRegistered(task_type, task_id))?;
        printer.update_var(var_id, value)
    }

    /// Emits a `PKT_DECODE` diagnostic, the uniform path every discard in
    /// `Scheduler` routes through (spec §7). Populates the built-in
    /// `PKT_DECODE` task printer's variable slots from `detail` before
    /// rendering, so a message like `task {task_number} was not
    /// registered` substitutes the real id instead of printing the
    /// placeholder literally.
    pub fn diagnose_decode_failure(&mut self, diagnostic: DecodeDiagnostic, detail: DecodeDiagnosticDetail) {
        warn!("pkt decode diagnostic: {diagnostic:?} ({detail:?})");
        // Rendering through the registered PKT_DECODE task printer keeps
        // this on the same "registered message" path as a real MCU-sourced
        // diagnostic would use, rather than being a separate ad hoc log
        // line.
        let Some(printer) = self.task_printers.get_mut(&(TaskType::Internal, internal_ids::PKT_DECODE)) else {
            return;
        };
        if let Some(expected) = detail.expected_size {
            let _ = printer.update_var(0, Value::I32(expected));
        }
        if let Some(received) = detail.received_size {
            let _ = printer.update_var(1, Value::U32(received as u32));
        }
        if let Some(task_number) = detail.task_number {
            let _ = printer.update_var(2, Value::U8(task_number));
        }
        if let Some(rendered) = printer.render(diagnostic as u32) {
            println!("{rendered}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_render_message() {
        let mut printer = Printer::new(true);
        printer
            .register_task(TaskType::External, 10, "ELEVATOR", vec!["floor".into()])
            .unwrap();
        printer
            .register_message(TaskType::External, 10, 0, "now at floor {floor}")
            .unwrap();
        printer
            .modify_task_value(10, TaskType::External, 0, b'B', &[3])
            .unwrap();
        assert_eq!(
            printer
                .task_printers
                .get(&(TaskType::External, 10))
                .unwrap()
                .render(0),
            Some("now at floor 3".to_string())
        );
    }

    #[test]
    fn silenced_message_renders_empty() {
        let mut printer = Printer::new(true);
        printer.register_task(TaskType::External, 1, "X", vec![]).unwrap();
        printer.register_message(TaskType::External, 1, 0, "hi").unwrap();
        printer.set_message_silenced(TaskType::External, 1, 0, true);
        assert_eq!(
            printer.task_printers.get(&(TaskType::External, 1)).unwrap().render(0),
            Some(String::new())
        );
    }

    #[test]
    fn unpack_respects_endianness() {
        let mut printer = Printer::new(false); // big-endian
        printer.register_task(TaskType::External, 1, "X", vec!["v".into()]).unwrap();
        printer.register_message(TaskType::External, 1, 0, "{v}").unwrap();
        printer
            .modify_task_value(1, TaskType::External, 0, b'H', &[0x01, 0x00])
            .unwrap();
        assert_eq!(
            printer.task_printers.get(&(TaskType::External, 1)).unwrap().render(0),
            Some("256".to_string())
        );
    }

    #[test]
    fn unknown_type_code_errors() {
        let mut printer = Printer::new(true);
        printer.register_task(TaskType::External, 1, "X", vec!["v".into()]).unwrap();
        let err = printer
            .modify_task_value(1, TaskType::External, 0, b'z', &[0])
            .unwrap_err();
        assert!(matches!(err, PrinterError::UnknownTypeCode(b'z')));
    }

    #[test]
    fn internal_task_printers_preregistered() {
        let printer = Printer::new(true);
        assert!(printer
            .task_printers
            .contains_key(&(TaskType::Internal, internal_ids::PKT_DECODE)));
    }

    #[test]
    fn var_out_of_range_errors() {
        let mut printer = Printer::new(true);
        printer.register_task(TaskType::External, 1, "X", vec![]).unwrap();
        let err = printer
            .modify_task_value(1, TaskType::External, 0, b'B', &[1])
            .unwrap_err();
        assert!(matches!(err, PrinterError::VariableOutOfRange { .. }));
    }

    #[test]
    fn unknown_task_diagnostic_substitutes_task_number() {
        let mut printer = Printer::new(true);
        printer.diagnose_decode_failure(
            DecodeDiagnostic::UnknownTask,
            DecodeDiagnosticDetail {
                task_number: Some(42),
                ..Default::default()
            },
        );
        let rendered = printer
            .task_printers
            .get(&(TaskType::Internal, internal_ids::PKT_DECODE))
            .unwrap()
            .render(DecodeDiagnostic::UnknownTask as u32)
            .unwrap();
        assert_eq!(rendered, "task 42 was not registered");
    }

    #[test]
    fn size_mismatch_diagnostic_substitutes_all_three_fields() {
        let mut printer = Printer::new(true);
        printer.diagnose_decode_failure(
            DecodeDiagnostic::SizeMismatch,
            DecodeDiagnosticDetail {
                expected_size: Some(3),
                received_size: Some(2),
                task_number: Some(7),
            },
        );
        let rendered = printer
            .task_printers
            .get(&(TaskType::Internal, internal_ids::PKT_DECODE))
            .unwrap()
            .render(DecodeDiagnostic::SizeMismatch as u32)
            .unwrap();
        assert_eq!(rendered, "expected 3 byte(s) but received 2 byte(s) for task 7");
    }
}
