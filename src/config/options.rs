use super::Config;
use tracing::warn;

/// A boolean option declared as `(key, default, description)`.
#[derive(Debug, Clone, Copy)]
pub struct BoolOption {
    pub key: &'static str,
    pub default: bool,
    pub description: &'static str,
}

/// An integer option. String values are parsed as decimal or `0x` hex.
#[derive(Debug, Clone, Copy)]
pub struct IntOption {
    pub key: &'static str,
    pub default: i64,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct StringOption {
    pub key: &'static str,
    pub default: &'static str,
    pub description: &'static str,
}

impl BoolOption {
    pub const fn new(key: &'static str, default: bool, description: &'static str) -> Self {
        Self {
            key,
            default,
            description,
        }
    }

    pub fn get(&self, config: &Config) -> bool {
        match config.get(self.key) {
            None => self.default,
            Some(value) => super::as_bool(value).unwrap_or_else(|| {
                warn!(key = self.key, value = %value, default = self.default, "Could not get bool option, returning default");
                self.default
            }),
        }
    }
}

impl IntOption {
    pub const fn new(key: &'static str, default: i64, description: &'static str) -> Self {
        Self {
            key,
            default,
            description,
        }
    }

    pub fn get(&self, config: &Config) -> i64 {
        match config.get(self.key) {
            None => self.default,
            Some(value) => super::as_int(value).unwrap_or_else(|| {
                warn!(key = self.key, value = %value, default = self.default, "Could not get int option, returning default");
                self.default
            }),
        }
    }
}

impl StringOption {
    pub const fn new(key: &'static str, default: &'static str, description: &'static str) -> Self {
        Self {
            key,
            default,
            description,
        }
    }

    pub fn get(&self, config: &Config) -> String {
        config
            .get(self.key)
            .map(super::as_string)
            .unwrap_or_else(|| self.default.to_string())
    }
}

pub const NAME: StringOption = StringOption::new(
    "instance.name",
    "autograder",
    "A name to identify this autograder instance. Should only contain alphanumerics and underscores.",
);

pub const BASE_DIR: StringOption = StringOption::new(
    "dirs.base",
    "",
    "The base dir for autograder to store data. Defaults to $HOME/.local/share. Must not be set in config files.",
);

pub const BACKUP_DIR: StringOption = StringOption::new(
    "dirs.backup",
    "",
    "Path to where backups are made. Defaults to inside the work dir.",
);

pub const UNIT_TESTING_MODE: BoolOption = BoolOption::new(
    "testing",
    false,
    "Assume tests are being run, which may alter some operations.",
);

pub const LOAD_TEST_DATA: BoolOption =
    BoolOption::new("testdata.load", false, "Load test data when the server starts.");

pub const LOG_TEXT_LEVEL: StringOption = StringOption::new(
    "log.text.level",
    "info",
    "The default logging level for the text (stdout) logger.",
);

pub const LOG_TEXT_FORMAT: StringOption = StringOption::new(
    "log.text.format",
    "json",
    "Format of the text logger: 'json' or 'pretty'.",
);

pub const LOG_BACKEND_LEVEL: StringOption = StringOption::new(
    "log.backend.level",
    "info",
    "The default logging level for the backend (log store) logger.",
);

pub const WEB_HTTP_PORT: IntOption =
    IntOption::new("web.http.port", 8080, "The port to serve HTTP traffic on.");

pub const WEB_MAX_FILE_SIZE_KB: IntOption = IntOption::new(
    "web.maxsize",
    2 * 1024,
    "The maximum allowed file size (in KB) submitted via POST request.",
);

pub const NO_TASKS: BoolOption = BoolOption::new("tasks.disable", false, "Disable all scheduled tasks.");

pub const TASK_MIN_REST_SECS: IntOption = IntOption::new(
    "tasks.minrest",
    10 * 60,
    "The minimum number of seconds between runs of the same task. Negative disables the check.",
);

pub const SERVER_STACK_SIZE: IntOption = IntOption::new(
    "server.stacksize",
    0x8000,
    "Stack size (bytes) for request coroutines. Accepts decimal or 0x hex.",
);

pub const EMAIL_FROM: StringOption = StringOption::new(
    "email.from",
    "autograder@localhost",
    "From address for emails sent from the autograder.",
);

/// Every declared option as `(key, description)`, for `--help`-style listings.
pub fn describe_all() -> Vec<(&'static str, &'static str)> {
    vec![
        (NAME.key, NAME.description),
        (BASE_DIR.key, BASE_DIR.description),
        (BACKUP_DIR.key, BACKUP_DIR.description),
        (UNIT_TESTING_MODE.key, UNIT_TESTING_MODE.description),
        (LOAD_TEST_DATA.key, LOAD_TEST_DATA.description),
        (LOG_TEXT_LEVEL.key, LOG_TEXT_LEVEL.description),
        (LOG_TEXT_FORMAT.key, LOG_TEXT_FORMAT.description),
        (LOG_BACKEND_LEVEL.key, LOG_BACKEND_LEVEL.description),
        (WEB_HTTP_PORT.key, WEB_HTTP_PORT.description),
        (WEB_MAX_FILE_SIZE_KB.key, WEB_MAX_FILE_SIZE_KB.description),
        (NO_TASKS.key, NO_TASKS.description),
        (TASK_MIN_REST_SECS.key, TASK_MIN_REST_SECS.description),
        (SERVER_STACK_SIZE.key, SERVER_STACK_SIZE.description),
        (EMAIL_FROM.key, EMAIL_FROM.description),
    ]
}
