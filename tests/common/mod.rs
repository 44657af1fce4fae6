#![allow(dead_code)]

use certkeeper::cli::CommandLineArguments;
use certkeeper::config::Configuration;
use clap::Parser;
use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

pub const DOMAIN: &str = "example.com";
pub const PASSWORD: &str = "correct horse battery staple";

/// Loads a configuration the way the binary does, rooted below `root`.
pub fn load_config(root: &Path, extra: &[&str]) -> anyhow::Result<Configuration> {
    let certificate_path = root.join("certs");
    let challenge_path = root.join("challenges");
    let mut args = vec![
        "certkeeper".to_string(),
        "--staging".to_string(),
        "YES".to_string(),
        "--account-email".to_string(),
        "admin@example.com".to_string(),
        "--domain".to_string(),
        DOMAIN.to_string(),
        "--country".to_string(),
        "NL".to_string(),
        "--organization".to_string(),
        "Example B.V.".to_string(),
        "--certificate-password".to_string(),
        PASSWORD.to_string(),
        "--delay".to_string(),
        "1h".to_string(),
        "--certificate-path".to_string(),
        certificate_path.to_string_lossy().into_owned(),
        "--challenge-path".to_string(),
        challenge_path.to_string_lossy().into_owned(),
    ];
    args.extend(extra.iter().map(ToString::to_string));
    let cli = CommandLineArguments::try_parse_from(args)?;
    Ok(Configuration::load(cli)?)
}

/// Collects formatted log output of the current thread.
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Captures until the returned guard is dropped.
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub fn count(&self, message: &str) -> usize {
        self.contents().matches(message).count()
    }

    /// Asserts that every message shows up, in this order.
    pub fn assert_in_order(&self, messages: &[&str]) {
        let contents = self.contents();
        let mut position = 0;
        for message in messages {
            match contents[position..].find(message) {
                Some(offset) => position += offset + message.len(),
                None => panic!("Expected {message:?} after position {position} in log:\n{contents}"),
            }
        }
    }
}

pub struct LogWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            buffer: self.buffer.clone(),
        }
    }
}
