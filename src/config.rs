use std::time::Duration;

/// Fader range, `MAX_FADER / 2` is the balanced centre.
pub const MAX_FADER: u32 = 100;
/// Reverb level range, 0 switches the effect off.
pub const MAX_REVERB: u32 = 100;
/// The server port is fixed and always the same on both peers.
pub const SERVER_PORT: u16 = 22122;
/// Depth of the moving average used for the block timing jitter.
pub const JITTER_AVG_LEN: usize = 2000;
/// How long `stop()` waits for the audio thread before giving up.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);
/// Number of `get_data` calls without a fresh packet before the channel
/// reports itself disconnected.
pub const CONNECTION_TIMEOUT_BLOCKS: u32 = 200;

#[derive(Debug, Clone)]
pub struct Config {
    // 音频配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub device_sample_rate: u32,
    pub network_sample_rate: u32,
    pub block_duration_ms: u32,

    // 混音初始值（运行时可由 GUI 修改）
    pub fader: u32,
    pub reverb_level: u32,
    pub reverb_on_left: bool,

    // 网络配置
    pub server_address: &'static str,
    pub local_port: u16,
    pub jitter_buffer_blocks: usize,

    // GUI进程配置
    pub gui_local_ip: &'static str,
    pub gui_local_port: u16,
    pub gui_remote_ip: &'static str,
    pub gui_remote_port: u16,
    pub gui_buffer_size: usize,

    pub trace_dump_file: &'static str,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        let config = Self {
            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            device_sample_rate: env!("AUDIO_DEVICE_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_DEVICE_SAMPLE_RATE")?,
            network_sample_rate: env!("AUDIO_NETWORK_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_NETWORK_SAMPLE_RATE")?,
            block_duration_ms: env!("AUDIO_BLOCK_DURATION_MS")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_BLOCK_DURATION_MS")?,

            fader: env!("MIX_FADER")
                .parse()
                .map_err(|_| "Failed to parse MIX_FADER")?,
            reverb_level: env!("MIX_REVERB_LEVEL")
                .parse()
                .map_err(|_| "Failed to parse MIX_REVERB_LEVEL")?,
            reverb_on_left: env!("MIX_REVERB_ON_LEFT")
                .parse()
                .map_err(|_| "Failed to parse MIX_REVERB_ON_LEFT")?,

            server_address: env!("NET_SERVER_ADDRESS"),
            local_port: env!("NET_LOCAL_PORT")
                .parse()
                .map_err(|_| "Failed to parse NET_LOCAL_PORT")?,
            jitter_buffer_blocks: env!("NET_JITTER_BUFFER_BLOCKS")
                .parse()
                .map_err(|_| "Failed to parse NET_JITTER_BUFFER_BLOCKS")?,

            gui_local_ip: env!("GUI_LOCAL_IP"),
            gui_local_port: env!("GUI_LOCAL_PORT")
                .parse()
                .map_err(|_| "Failed to parse GUI_LOCAL_PORT")?,
            gui_remote_ip: env!("GUI_REMOTE_IP"),
            gui_remote_port: env!("GUI_REMOTE_PORT")
                .parse()
                .map_err(|_| "Failed to parse GUI_REMOTE_PORT")?,
            gui_buffer_size: env!("GUI_BUFFER_SIZE")
                .parse()
                .map_err(|_| "Failed to parse GUI_BUFFER_SIZE")?,

            trace_dump_file: env!("TRACE_DUMP_FILE"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the block geometry and the initial mix settings.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.device_sample_rate == 0 || self.network_sample_rate == 0 {
            return Err("sample rates must be non-zero");
        }
        if self.block_duration_ms == 0 {
            return Err("block duration must be non-zero");
        }
        if self.device_block_size() == 0 || self.network_block_size() == 0 {
            return Err("block duration too short for the configured sample rates");
        }
        // both block sizes must cover exactly the same time span
        if self.device_block_size() as u64 * self.network_sample_rate as u64
            != self.network_block_size() as u64 * self.device_sample_rate as u64
        {
            return Err("device and network block sizes do not match the sample rate ratio");
        }
        if self.fader > MAX_FADER {
            return Err("fader out of range");
        }
        if self.reverb_level > MAX_REVERB {
            return Err("reverb level out of range");
        }
        if self.jitter_buffer_blocks == 0 {
            return Err("jitter buffer needs at least one block");
        }
        Ok(())
    }

    /// Samples per channel in one device (sound card) block.
    pub fn device_block_size(&self) -> usize {
        (self.device_sample_rate as u64 * self.block_duration_ms as u64 / 1000) as usize
    }

    /// Samples in one mono network block.
    pub fn network_block_size(&self) -> usize {
        (self.network_sample_rate as u64 * self.block_duration_ms as u64 / 1000) as usize
    }

    /// Nominal duration of one block in milliseconds.
    pub fn block_duration(&self) -> f64 {
        self.network_block_size() as f64 * 1000.0 / self.network_sample_rate as f64
    }
}

#[cfg(test)]
pub(crate) fn test_config(device_rate: u32, network_rate: u32) -> Config {
    Config {
        capture_device: "null",
        playback_device: "null",
        device_sample_rate: device_rate,
        network_sample_rate: network_rate,
        block_duration_ms: 2,
        fader: MAX_FADER / 2,
        reverb_level: 0,
        reverb_on_left: true,
        server_address: "",
        local_port: 0,
        jitter_buffer_blocks: 4,
        gui_local_ip: "127.0.0.1",
        gui_local_port: 0,
        gui_remote_ip: "127.0.0.1",
        gui_remote_port: 0,
        gui_buffer_size: 2048,
        trace_dump_file: "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes_follow_rates() {
        let config = test_config(48000, 24000);
        assert_eq!(config.device_block_size(), 96);
        assert_eq!(config.network_block_size(), 48);
        assert!((config.block_duration() - 2.0).abs() < 1e-12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_mismatched_geometry() {
        let config = test_config(44100, 24000);
        // 88 device samples vs 48 network samples is not 44100:24000
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_mix() {
        let mut config = test_config(48000, 24000);
        config.fader = MAX_FADER + 1;
        assert!(config.validate().is_err());

        let mut config = test_config(48000, 24000);
        config.reverb_level = MAX_REVERB + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_time_config_is_valid() {
        assert!(Config::new().is_ok());
    }
}
