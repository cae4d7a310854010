//! Two independent logging channels (§10.2): operational logging via the
//! `log` facade, initialized once from `main.rs`, and a separate tagged
//! event log consumed by tests and progress reporters. They stay distinct
//! on purpose -- one is free-text for a human, the other a fixed grammar
//! for machines.

use std::io::Write;

/// Initializes the `log`/`env_logger` operational channel. `verbosity`
/// mirrors the teacher's `-v` flag, mapped onto `RUST_LOG` filter levels
/// when the environment variable isn't already set.
pub fn init_operational_logging(verbosity: u32) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    let _ = builder.try_init();
}

/// A single tagged record on the structured audit-trail stream:
/// `kind:stripe:disk:sub:...`. Kinds mirror §4.F's observable side effects.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub kind: &'static str,
    pub stripe: u32,
    pub disk: String,
    pub sub: String,
    pub detail: String,
}

impl EventRecord {
    pub fn to_line(&self) -> String {
        format!("{}:{}:{}:{}:{}", self.kind, self.stripe, self.disk, self.sub, self.detail)
    }
}

/// The machine-readable event log. Writes to an injected `Write`
/// (defaulting to stdout) and, if configured, a `--log FILE` mirror.
/// Never routed through `log`/`env_logger` -- this is a fixed grammar, not
/// free text.
pub struct EventLog {
    stdlog: Box<dyn Write + Send>,
    file: Option<std::fs::File>,
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new(stdlog: Box<dyn Write + Send>, file: Option<std::fs::File>) -> EventLog {
        EventLog {
            stdlog,
            file,
            records: Vec::new(),
        }
    }

    pub fn stdout() -> EventLog {
        EventLog::new(Box::new(std::io::stdout()), None)
    }

    pub fn emit(&mut self, record: EventRecord) {
        let line = record.to_line();
        let _ = writeln!(self.stdlog, "{line}");
        if let Some(f) = self.file.as_mut() {
            let _ = writeln!(f, "{line}");
        }
        self.records.push(record);
    }

    /// Records emitted so far, for tests that assert on the audit trail
    /// without parsing the written stream back out.
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_formats_as_colon_separated_fields() {
        let r = EventRecord {
            kind: "fixed",
            stripe: 12,
            disk: "d1".into(),
            sub: "movie.mkv".into(),
            detail: "ok".into(),
        };
        assert_eq!(r.to_line(), "fixed:12:d1:movie.mkv:ok");
    }

    #[test]
    fn emit_tracks_records_in_order() {
        let mut log = EventLog::new(Box::new(Vec::new()), None);
        log.emit(EventRecord {
            kind: "error",
            stripe: 0,
            disk: "d1".into(),
            sub: "a".into(),
            detail: "".into(),
        });
        log.emit(EventRecord {
            kind: "fixed",
            stripe: 0,
            disk: "d1".into(),
            sub: "a".into(),
            detail: "".into(),
        });
        assert_eq!(log.records().len(), 2);
        assert_eq!(log.records()[1].kind, "fixed");
    }
}
