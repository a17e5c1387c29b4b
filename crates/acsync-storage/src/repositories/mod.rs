pub mod attendance_log;
pub mod employee;
pub mod terminal;

pub use attendance_log::{AttendanceLogRepository, SqliteAttendanceLogRepository};
pub use employee::{EmployeeRepository, SqliteEmployeeRepository};
pub use terminal::{SqliteTerminalRepository, TerminalRepository};
