use ferrolink_channel::{ChannelConfig, SecureChannel, SessionKeys};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::DuplexStream;

/// Two linked channels with pre-derived complementary keys.
pub async fn channel_pair() -> (SecureChannel<DuplexStream>, SecureChannel<DuplexStream>) {
    let (a_io, b_io) = tokio::io::duplex(1024 * 1024);
    let config = ChannelConfig {
        timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let a_keys = SessionKeys {
        send_key: [0x11; 32],
        recv_key: [0x22; 32],
        send_salt: [0xaa; 16],
        recv_salt: [0xbb; 16],
    };
    let b_keys = SessionKeys {
        send_key: [0x22; 32],
        recv_key: [0x11; 32],
        send_salt: [0xbb; 16],
        recv_salt: [0xaa; 16],
    };
    (
        SecureChannel::from_parts(a_io, &a_keys, config.clone()),
        SecureChannel::from_parts(b_io, &b_keys, config),
    )
}

pub fn write_temp_file(dir: &tempfile::TempDir, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
