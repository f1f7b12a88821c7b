//! Host script: introductory messages and the discussion prompt pool.

use rand::seq::SliceRandom;
use rand::Rng;

/// Messages sent one by one when a room starts.
pub const INTRO_MESSAGES: &[&str] = &[
    "Hello everyone!\nI'm your host for tonight :)",
    "Let me quickly explain how this works.",
    "The session runs for about fifteen minutes. Once it ends, this room cannot be rejoined.",
    "I'll share a few questions. Answer them freely and get to know each other.",
    "At the end you can pick the one person you'd most like to keep talking to.",
    "If two of you pick each other, I'll open a private chat just for the two of you.",
    "Ready? Let's begin!",
];

/// Pool of discussion prompts.
pub const PROMPT_POOL: &[&str] = &[
    "What is the best thing that happened to you this week?",
    "If you could travel anywhere tomorrow, where would you go?",
    "What does your perfect weekend look like?",
    "What is a small thing that always makes you smile?",
    "Which food could you eat every day without getting bored?",
    "What's a hobby you picked up recently, or want to try?",
    "What is the last song you had on repeat?",
    "Morning person or night owl, and why?",
    "What's a movie or show you'd recommend to everyone here?",
    "What would your ideal first date be?",
];

/// Draw `count` distinct prompts from the pool.
///
/// A partial Fisher-Yates shuffle over the pool: every prompt is equally
/// likely and none repeats within a room. `count` is capped at the pool size.
pub fn pick_prompts<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<String> {
    let mut pool: Vec<&str> = PROMPT_POOL.to_vec();
    let amount = count.min(pool.len());
    let (chosen, _) = pool.partial_shuffle(rng, amount);
    chosen.iter().map(|p| (*p).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_picks_distinct_prompts_from_pool() {
        let mut rng = StdRng::seed_from_u64(7);
        let prompts = pick_prompts(&mut rng, 3);

        assert_eq!(prompts.len(), 3);
        let unique: HashSet<&String> = prompts.iter().collect();
        assert_eq!(unique.len(), 3);
        assert!(prompts.iter().all(|p| PROMPT_POOL.contains(&p.as_str())));
    }

    #[test]
    fn test_count_is_capped_at_pool_size() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pick_prompts(&mut rng, 100).len(), PROMPT_POOL.len());
        assert!(pick_prompts(&mut rng, 0).is_empty());
    }

    #[test]
    fn test_every_prompt_can_be_drawn() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = HashSet::new();
        for _ in 0..500 {
            seen.extend(pick_prompts(&mut rng, 1));
        }
        assert_eq!(seen.len(), PROMPT_POOL.len());
    }
}
