pub mod effect_trait;
pub mod equalizer;
pub mod gain;
pub mod mute;

pub use effect_trait::Effect;
pub use equalizer::Equalizer;
pub use gain::Gain;
pub use mute::Mute;
