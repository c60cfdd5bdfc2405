/// Log levels a module may emit through `OrApi::log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum LogLevel {
	Debug = 0,
	Info = 1,
	Warn = 2,
	Error = 3,
	/// Requires the logging-fatal capability. Never terminates the host.
	Fatal = 4,
}

impl LogLevel {
	/// Decode the raw level passed across the boundary.
	pub fn from_raw(raw: u32) -> Option<Self> {
		match raw {
			0 => Some(LogLevel::Debug),
			1 => Some(LogLevel::Info),
			2 => Some(LogLevel::Warn),
			3 => Some(LogLevel::Error),
			4 => Some(LogLevel::Fatal),
			_ => None,
		}
	}

	/// Convert to string representation
	pub fn as_str(&self) -> &'static str {
		match self {
			LogLevel::Debug => "DEBUG",
			LogLevel::Info => "INFO",
			LogLevel::Warn => "WARN",
			LogLevel::Error => "ERROR",
			LogLevel::Fatal => "FATAL",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_from_raw() {
		assert_eq!(LogLevel::from_raw(LogLevel::Fatal as u32), Some(LogLevel::Fatal));
		assert_eq!(LogLevel::from_raw(1), Some(LogLevel::Info));
		assert_eq!(LogLevel::from_raw(17), None);
	}

	#[test]
	fn test_ordering() {
		assert!(LogLevel::Fatal > LogLevel::Error);
		assert!(LogLevel::Debug < LogLevel::Info);
	}
}
