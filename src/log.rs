use crate::err::Error;
use serde::Serialize;
use std::fmt;
use std::io::{BufWriter, Write};

/// Human-readable messages collected while clearing credentials; returned with every report.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Logs {
    logs: Option<Vec<Log>>,
}

impl Logs {
    pub(crate) fn add<T: ToString>(&mut self, code: LogCode, text: &T) {
        self.add_internal(Log {
            code,
            text: text.to_string(),
        });
    }

    fn add_internal(&mut self, log: Log) {
        match &mut self.logs {
            Some(logs) => logs.push(log),
            None => self.logs = Some(vec![log]),
        }
    }

    pub fn get(&self) -> Option<&Vec<Log>> {
        self.logs.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_none()
    }

    /// True if any collected message has the given code.
    pub fn has(&self, code: LogCode) -> bool {
        self.iter().any(|log| log.code == code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Log> {
        self.logs.iter().flatten()
    }

    pub(crate) fn prepend_all(&mut self, prefix: &str) {
        if let Some(logs) = &mut self.logs {
            for log in logs {
                log.text = format!("{}{}", prefix, log.text)
            }
        }
    }

    pub(crate) fn extend(&mut self, additional: Self) {
        if let Some(additional) = additional.logs {
            match &mut self.logs {
                Some(logs) => logs.extend(additional),
                None => self.logs = Some(additional),
            }
        }
    }

    pub fn write<W: Write>(&self, output: W) -> Result<(), Error> {
        let mut writer = BufWriter::new(output);
        for log in self.iter() {
            writeln!(&mut writer, "{:?} {}", log.code, log.text)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Display for Logs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for log in self.iter() {
            writeln!(f, "{:?} {}", log.code, log.text)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum LogCode {
    WarningFormat,
    WarningKeyAbsent,
    WarningUnsupportedVersion,
    WarningIntegrity,
    WarningSkipped,
    Info,
}

impl LogCode {
    /// Picks the code that matches a record-level error.
    pub(crate) fn for_error(error: &Error) -> Self {
        match error {
            Error::Format { .. } => LogCode::WarningFormat,
            Error::KeyNotFound { .. } => LogCode::WarningKeyAbsent,
            Error::UnsupportedVersion { .. } => LogCode::WarningUnsupportedVersion,
            Error::Integrity { .. } => LogCode::WarningIntegrity,
            _ => LogCode::WarningSkipped,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Log {
    pub code: LogCode,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_add_extend_write() {
        let mut logs = Logs::default();
        assert!(logs.is_empty());
        logs.add(LogCode::Info, &"boot key recovered");

        let mut other = Logs::default();
        other.add(LogCode::WarningIntegrity, &"NL$2: tag mismatch");
        logs.extend(other);
        logs.extend(Logs::default());
        assert_eq!(2, logs.iter().count());
        assert!(logs.has(LogCode::WarningIntegrity));
        assert!(!logs.has(LogCode::WarningFormat));

        logs.prepend_all("SECURITY: ");
        let mut out = Vec::new();
        logs.write(&mut out).unwrap();
        assert_eq!(
            "Info SECURITY: boot key recovered\nWarningIntegrity SECURITY: NL$2: tag mismatch\n",
            String::from_utf8(out).unwrap()
        );
    }

    #[test]
    fn test_log_code_for_error() {
        assert_eq!(LogCode::WarningKeyAbsent, LogCode::for_error(&Error::key_not_found("\\Cache")));
        assert_eq!(
            LogCode::WarningUnsupportedVersion,
            LogCode::for_error(&Error::UnsupportedVersion { version: 1 })
        );
    }
}
