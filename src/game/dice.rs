use rand::Rng;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

/// Source of the two die values fixed at round creation
pub trait DiceRoller: Send + Sync {
    fn roll(&self) -> (u8, u8);
}

/// Two independent uniform draws from 1..=6
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomDice;

impl DiceRoller for RandomDice {
    fn roll(&self) -> (u8, u8) {
        let mut rng = rand::thread_rng();
        (rng.gen_range(1..=6), rng.gen_range(1..=6))
    }
}

/// Plays back a fixed sequence of rolls, then repeats the fallback
#[derive(Debug, Clone)]
pub struct ScriptedDice {
    queue: Arc<Mutex<VecDeque<(u8, u8)>>>,
    fallback: (u8, u8),
}

impl ScriptedDice {
    pub fn new(rolls: impl IntoIterator<Item = (u8, u8)>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(rolls.into_iter().collect())),
            fallback: (1, 1),
        }
    }

    pub fn with_fallback(mut self, fallback: (u8, u8)) -> Self {
        self.fallback = fallback;
        self
    }

    /// Queue another roll behind the existing ones
    pub fn push(&self, roll: (u8, u8)) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(roll);
    }
}

impl DiceRoller for ScriptedDice {
    fn roll(&self) -> (u8, u8) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(self.fallback)
    }
}
