mod timestamp;

pub use timestamp::DTimestamp;
