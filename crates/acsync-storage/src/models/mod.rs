pub mod attendance_log;
pub mod employee;
pub mod terminal;

pub use attendance_log::{AttendanceLogEntry, NewAttendanceLogEntry};
pub use employee::{Account, Employee, EmployeeMapping};
pub use terminal::Terminal;
