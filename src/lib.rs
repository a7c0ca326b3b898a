pub mod annotation;
pub mod bcm;
pub mod config;
pub mod de;
pub mod domain;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod scratch;
pub mod sheet;
