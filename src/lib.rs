pub mod call;
pub mod client;
pub mod config;
pub mod event;
pub mod host;
pub mod media;
pub mod proto;
pub mod version;

pub type Sample = i16;
pub type PcmBuf = Vec<Sample>;

// get timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    let now = std::time::SystemTime::now();
    now.duration_since(std::time::UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}
