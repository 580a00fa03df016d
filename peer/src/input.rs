//! Input axes driving locally owned agents.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};

/// Actions requested for one agent during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputAxes {
    pub forward: bool,
    pub backward: bool,
    pub rotate_left: bool,
    pub rotate_right: bool,
    pub turret_left: bool,
    pub turret_right: bool,
    pub fire: bool,
}

impl InputAxes {
    pub fn is_idle(&self) -> bool {
        *self == InputAxes::default()
    }

    /// -1, 0 or 1 along the heading.
    pub fn drive(&self) -> f32 {
        axis(self.forward, self.backward)
    }

    /// Positive turns counter-clockwise.
    pub fn steer(&self) -> f32 {
        axis(self.rotate_left, self.rotate_right)
    }

    pub fn aim(&self) -> f32 {
        axis(self.turret_left, self.turret_right)
    }
}

fn axis(positive: bool, negative: bool) -> f32 {
    match (positive, negative) {
        (true, false) => 1.0,
        (false, true) => -1.0,
        _ => 0.0,
    }
}

/// Source of input for one locally bound agent, sampled once per tick.
pub trait InputSource: Send {
    fn sample(&mut self) -> InputAxes;
}

impl<F> InputSource for F
where
    F: FnMut() -> InputAxes + Send,
{
    fn sample(&mut self) -> InputAxes {
        self()
    }
}

/// Input that can be changed from another thread, e.g. a keyboard poller.
#[derive(Debug, Clone, Default)]
pub struct SharedInput(Arc<Mutex<InputAxes>>);

impl SharedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, axes: InputAxes) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = axes;
    }

    pub fn get(&self) -> InputAxes {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InputSource for SharedInput {
    fn sample(&mut self) -> InputAxes {
        self.get()
    }
}

/// Wanders around and shoots, switching its intent every few ticks.
pub struct BotInput {
    rng: StdRng,
    current: InputAxes,
    ticks_left: u32,
}

impl BotInput {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            current: InputAxes::default(),
            ticks_left: 0,
        }
    }
}

impl InputSource for BotInput {
    fn sample(&mut self) -> InputAxes {
        if self.ticks_left == 0 {
            self.current = InputAxes {
                forward: self.rng.gen_bool(0.6),
                backward: self.rng.gen_bool(0.1),
                rotate_left: self.rng.gen_bool(0.3),
                rotate_right: self.rng.gen_bool(0.3),
                turret_left: self.rng.gen_bool(0.2),
                turret_right: self.rng.gen_bool(0.2),
                fire: self.rng.gen_bool(0.4),
            };
            self.ticks_left = self.rng.gen_range(10..60);
        }
        self.ticks_left -= 1;
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_axes_cancel() {
        let axes = InputAxes {
            forward: true,
            backward: true,
            rotate_left: true,
            ..InputAxes::default()
        };
        assert_eq!(axes.drive(), 0.0);
        assert_eq!(axes.steer(), 1.0);
        assert_eq!(axes.aim(), 0.0);
        assert!(!axes.is_idle());
        assert!(InputAxes::default().is_idle());
    }

    #[test]
    fn test_shared_input_is_seen_by_clones() {
        let input = SharedInput::new();
        let mut source = input.clone();
        input.set(InputAxes {
            fire: true,
            ..InputAxes::default()
        });
        assert!(source.sample().fire);
    }

    #[test]
    fn test_closure_input_source() {
        let mut calls = 0;
        let mut source = move || {
            calls += 1;
            InputAxes {
                forward: calls % 2 == 0,
                ..InputAxes::default()
            }
        };
        assert!(!InputSource::sample(&mut source).forward);
        assert!(InputSource::sample(&mut source).forward);
    }

    #[test]
    fn test_bot_is_deterministic_per_seed() {
        let mut a = BotInput::new(7);
        let mut b = BotInput::new(7);
        for _ in 0..100 {
            assert_eq!(a.sample(), b.sample());
        }
    }
}
