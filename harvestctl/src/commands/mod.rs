mod discover;
mod emotion;

pub use discover::{DiscoverArgs, EnrichArgs};
pub use emotion::{EmotionCommands, EmotionTransfer};
