use async_trait::async_trait;
use rand::Rng;

use crate::command::{Command, CommandContext, Reply};
use crate::error::CommandError;

const DEFAULT_COUNT: u32 = 1;
const DEFAULT_SIDES: u32 = 6;
const MAX_COUNT: u32 = 20;
const MAX_SINGLE_ARG: u32 = 100;
const MAX_SIDES: u32 = 1000;

const USAGE: &str = "/dice - one 6-sided die
/dice_3 - three 6-sided dice
/dice_50 - one 50-sided die
/dice_2,10 - two 10-sided dice";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Roll {
    pub count: u32,
    pub sides: u32,
}

impl Default for Roll {
    fn default() -> Self {
        Self {
            count: DEFAULT_COUNT,
            sides: DEFAULT_SIDES,
        }
    }
}

fn parse_number(text: &str) -> Option<u32> {
    text.trim().parse().ok()
}

/// A single number up to 20 is a die count, above that a side count.
/// `count,sides` are checked independently; anything unreadable falls back
/// to the defaults.
pub(crate) fn parse_roll(argument: Option<&str>) -> Roll {
    let mut roll = Roll::default();
    let Some(argument) = argument else {
        return roll;
    };

    let params: Vec<&str> = argument.split(',').collect();
    match params.as_slice() {
        [single] => {
            if let Some(n) = parse_number(single).filter(|n| (1..=MAX_SINGLE_ARG).contains(n)) {
                if n <= MAX_COUNT {
                    roll.count = n;
                } else {
                    roll.sides = n;
                }
            }
        }
        [count, sides] => {
            if let Some(count) = parse_number(count).filter(|n| (1..=MAX_COUNT).contains(n)) {
                roll.count = count;
            }
            if let Some(sides) = parse_number(sides).filter(|n| (1..=MAX_SIDES).contains(n)) {
                roll.sides = sides;
            }
        }
        _ => {}
    }
    roll
}

fn roll_dice(roll: Roll) -> Vec<u32> {
    let mut rng = rand::thread_rng();
    (0..roll.count).map(|_| rng.gen_range(1..=roll.sides)).collect()
}

fn dice_emoji(sides: u32) -> &'static str {
    match sides {
        0..=6 => "🎲",
        7..=12 => "🎯",
        13..=20 => "🎮",
        _ => "🔢",
    }
}

pub(crate) fn format_roll(roll: Roll, results: &[u32]) -> String {
    let shown: Vec<String> = results.iter().map(|r| format!("*{}*", r)).collect();
    let mut text = format!(
        "{} {} × {}-sided {}\n━━━━━━━━━━━━━━━━━━━━━━━━\n🎲 Result: {}\n",
        dice_emoji(roll.sides),
        roll.count,
        roll.sides,
        if roll.count == 1 { "die" } else { "dice" },
        shown.join(" ")
    );

    if roll.count > 1 {
        let sum: u32 = results.iter().sum();
        text.push_str(&format!("📊 Sum: {}\n", sum));
        text.push_str(&format!(
            "📈 Average: {:.1}\n",
            f64::from(sum) / f64::from(roll.count)
        ));
    }

    text.push_str("\n💡 Usage:\n");
    text.push_str(USAGE);
    text
}

pub struct DiceCommand;

#[async_trait]
impl Command for DiceCommand {
    fn name(&self) -> &str {
        "/dice"
    }

    fn description(&self) -> &str {
        "Roll dice"
    }

    fn usage(&self) -> Option<&str> {
        Some(USAGE)
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
        let roll = parse_roll(ctx.argument());
        let results = roll_dice(roll);
        Ok(Reply::text(format_roll(roll, &results)))
    }
}
