use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    audio: Audio,
    mix: Mix,
    network: Network,
    gui: Gui,
    trace: Trace,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    device_sample_rate: u32,
    network_sample_rate: u32,
    block_duration_ms: u32,
}

#[derive(Deserialize)]
struct Mix {
    fader: u32,
    reverb_level: u32,
    reverb_on_left: bool,
}

#[derive(Deserialize)]
struct Network {
    server_address: String,
    local_port: u16,
    jitter_buffer_blocks: usize,
}

#[derive(Deserialize)]
struct Gui {
    local_ip: String,
    local_port: u16,
    remote_ip: String,
    remote_port: u16,
    buffer_size: usize,
}

#[derive(Deserialize)]
struct Trace {
    dump_file: String,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 音频配置
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_DEVICE_SAMPLE_RATE={}", config.audio.device_sample_rate);
    println!("cargo:rustc-env=AUDIO_NETWORK_SAMPLE_RATE={}", config.audio.network_sample_rate);
    println!("cargo:rustc-env=AUDIO_BLOCK_DURATION_MS={}", config.audio.block_duration_ms);

    // 混音配置
    println!("cargo:rustc-env=MIX_FADER={}", config.mix.fader);
    println!("cargo:rustc-env=MIX_REVERB_LEVEL={}", config.mix.reverb_level);
    println!("cargo:rustc-env=MIX_REVERB_ON_LEFT={}", config.mix.reverb_on_left);

    // 网络配置
    println!("cargo:rustc-env=NET_SERVER_ADDRESS={}", config.network.server_address);
    println!("cargo:rustc-env=NET_LOCAL_PORT={}", config.network.local_port);
    println!("cargo:rustc-env=NET_JITTER_BUFFER_BLOCKS={}", config.network.jitter_buffer_blocks);

    // GUI 配置
    println!("cargo:rustc-env=GUI_LOCAL_IP={}", config.gui.local_ip);
    println!("cargo:rustc-env=GUI_LOCAL_PORT={}", config.gui.local_port);
    println!("cargo:rustc-env=GUI_REMOTE_IP={}", config.gui.remote_ip);
    println!("cargo:rustc-env=GUI_REMOTE_PORT={}", config.gui.remote_port);
    println!("cargo:rustc-env=GUI_BUFFER_SIZE={}", config.gui.buffer_size);

    println!("cargo:rustc-env=TRACE_DUMP_FILE={}", config.trace.dump_file);

    // speexdsp 通过 pkg-config 查找；musl 目标使用手动编译的静态库
    if std::env::var_os("CARGO_FEATURE_SPEEXDSP").is_some() {
        let target = std::env::var("TARGET").unwrap_or_default();
        if target.contains("musl") {
            if let Ok(sysroot) = std::env::var("MUSL_SYSROOT") {
                println!("cargo:rustc-link-search=native={}/usr/lib", sysroot);
            }
            println!("cargo:rustc-link-lib=static=speexdsp");
        } else {
            pkg_config::Config::new()
                .probe("speexdsp")
                .expect("Failed to find speexdsp. Please install libspeexdsp-dev.");
        }
    }
}
