use std::{str::FromStr, time::Duration};

lazy_static! {
    pub static ref ENV_TELLO_ADDR: String =
        get_env_str("ENV_TELLO_ADDR", String::from("192.168.10.1"));
    pub static ref ENV_TELLO_CTRL_PORT: u16 = get_env("ENV_TELLO_CTRL_PORT", 8889);
    pub static ref ENV_TELLO_VIDEO_PORT: u16 = get_env("ENV_TELLO_VIDEO_PORT", 6038);
    pub static ref ENV_TELLO_FRAME_WIDTH: usize = get_env("ENV_TELLO_FRAME_WIDTH", 960);
    pub static ref ENV_TELLO_FRAME_HEIGHT: usize = get_env("ENV_TELLO_FRAME_HEIGHT", 720);
    pub static ref ENV_TELLO_TAKEOFF_DELAY_MS: u64 = get_env("ENV_TELLO_TAKEOFF_DELAY_MS", 5000);
    pub static ref ENV_TELLO_LAND_DELAY_MS: u64 = get_env("ENV_TELLO_LAND_DELAY_MS", 15000);
    pub static ref ENV_TELLO_KEEPALIVE_MS: u64 = get_env("ENV_TELLO_KEEPALIVE_MS", 100);
    pub static ref ENV_TELLO_HANDSHAKE_TIMEOUT_MS: u64 =
        get_env("ENV_TELLO_HANDSHAKE_TIMEOUT_MS", 10000);
    pub static ref ENV_TELLO_IO_TIMEOUT_MS: u64 = get_env("ENV_TELLO_IO_TIMEOUT_MS", 500);
    pub static ref ENV_TELLO_TRANSCODER: String =
        get_env_str("ENV_TELLO_TRANSCODER", "ffmpeg".to_owned());
    pub static ref ENV_TELLO_PLAYER: String =
        get_env_str("ENV_TELLO_PLAYER", "mplayer".to_owned());
    pub static ref ENV_TELLO_LOG_LEVEL: tracing::Level =
        get_env("ENV_TELLO_LOG_LEVEL", tracing::Level::INFO);
}

pub fn get_env_str(name: &str, value: String) -> String {
    std::env::var(name).unwrap_or(value)
}

pub fn get_env<T: FromStr>(name: &str, value: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            tracing::warn!(name, raw, "can't parse env value, using default");
            value
        }),
        Err(_) => value,
    }
}

/// Startup snapshot of every tunable. Components take their values from here
/// rather than reading the environment themselves.
#[derive(Debug, Clone)]
pub struct Config {
    pub tello_addr: String,
    pub ctrl_port: u16,
    pub video_port: u16,
    pub frame_width: usize,
    pub frame_height: usize,
    pub takeoff_delay: Duration,
    pub land_delay: Duration,
    pub keepalive_period: Duration,
    pub handshake_timeout: Duration,
    pub io_timeout: Duration,
    pub transcoder: String,
    pub player: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            tello_addr: ENV_TELLO_ADDR.clone(),
            ctrl_port: *ENV_TELLO_CTRL_PORT,
            video_port: *ENV_TELLO_VIDEO_PORT,
            frame_width: *ENV_TELLO_FRAME_WIDTH,
            frame_height: *ENV_TELLO_FRAME_HEIGHT,
            takeoff_delay: Duration::from_millis(*ENV_TELLO_TAKEOFF_DELAY_MS),
            land_delay: Duration::from_millis(*ENV_TELLO_LAND_DELAY_MS),
            keepalive_period: Duration::from_millis(*ENV_TELLO_KEEPALIVE_MS),
            handshake_timeout: Duration::from_millis(*ENV_TELLO_HANDSHAKE_TIMEOUT_MS),
            io_timeout: Duration::from_millis(*ENV_TELLO_IO_TIMEOUT_MS),
            transcoder: ENV_TELLO_TRANSCODER.clone(),
            player: ENV_TELLO_PLAYER.clone(),
        }
    }

    pub fn remote_addr(&self) -> String {
        format!("{}:{}", self.tello_addr, self.ctrl_port)
    }

    pub fn frame_size(&self) -> usize {
        self.frame_width * self.frame_height * 3
    }
}
