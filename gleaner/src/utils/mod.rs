//! Clock, timestamp and URL helpers shared by every component.

mod domain;
pub mod timestamps;

pub use domain::{domain_of, extract_domain, same_domain};
pub use timestamps::{
    add_duration, iso_format, parse_retry_after, system_clock, Clock, ManualClock, SystemClock,
    Timestamp,
};
