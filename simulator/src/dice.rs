use kumasi_types::DICE_FACES;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

/// Source of dice rolls.
pub trait Dice: Send + Sync {
    /// A value in `1..=DICE_FACES`.
    fn roll(&self) -> u8;
}

/// Uniform rolls from a seeded ChaCha stream.
pub struct SeededDice {
    rng: Mutex<ChaCha8Rng>,
}

impl SeededDice {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::from_entropy()),
        }
    }
}

impl Dice for SeededDice {
    fn roll(&self) -> u8 {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(1..=DICE_FACES)
    }
}

/// Replays a fixed sequence of rolls, cycling when it runs out.
pub struct ScriptedDice {
    rolls: Mutex<VecDeque<u8>>,
}

impl ScriptedDice {
    pub fn new(rolls: impl IntoIterator<Item = u8>) -> Self {
        Self {
            rolls: Mutex::new(rolls.into_iter().collect()),
        }
    }
}

impl Dice for ScriptedDice {
    fn roll(&self) -> u8 {
        let mut rolls = self.rolls.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(roll) = rolls.pop_front() else {
            return 1;
        };
        rolls.push_back(roll);
        roll.clamp(1, DICE_FACES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_dice_in_range_and_deterministic() {
        let a = SeededDice::new(7);
        let b = SeededDice::new(7);
        for _ in 0..1_000 {
            let roll = a.roll();
            assert!((1..=DICE_FACES).contains(&roll));
            assert_eq!(roll, b.roll());
        }
    }

    #[test]
    fn test_scripted_dice_cycles() {
        let dice = ScriptedDice::new([6, 2]);
        assert_eq!(dice.roll(), 6);
        assert_eq!(dice.roll(), 2);
        assert_eq!(dice.roll(), 6);

        let empty = ScriptedDice::new(Vec::<u8>::new());
        assert_eq!(empty.roll(), 1);
    }
}
