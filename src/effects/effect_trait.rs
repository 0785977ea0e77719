/// A stage in the per-channel effect chain (EQ → Gain → Mute).
///
/// All effects must be Send + Sync: their owning `Arc<Mutex<_>>` is shared
/// between the audio thread's `process` calls and the control thread's
/// `set_*` mutators. `process` runs on the audio thread and must not
/// allocate or block.
pub trait Effect: Send + Sync {
    fn process(&mut self, sample: i16) -> i16;
}
