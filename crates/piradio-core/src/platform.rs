use std::path::PathBuf;

pub const DAEMON_TCP_PORT: u16 = 9876;

pub fn mpv_socket_name() -> String {
    format!("{}/piradio-mpv.sock", std::env::temp_dir().display())
}

pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server={}", mpv_socket_name())
}

/// `~/.local/share/piradio/`. The log file lives here.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".local")
        .join("share")
        .join("piradio")
}

/// `~/.config/piradio/`. Kept XDG-style on every unix, the appliance is
/// usually a headless Pi where `dirs::config_dir` agrees anyway.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("piradio")
}

pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

/// Find mpv for playback.
///
/// Searches in order:
/// 1. MPV_PATH environment variable
/// 2. Beside the current executable
/// 3. PATH
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("MPV_PATH") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let exe_name = mpv_binary_name();
    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let local_mpv = dir.join(exe_name);
            if local_mpv.exists() {
                return Some(local_mpv);
            }
        }
    }

    let path = std::env::var("PATH").ok()?;
    path.split(':')
        .map(|dir| PathBuf::from(dir).join(exe_name))
        .find(|p| p.exists())
}
