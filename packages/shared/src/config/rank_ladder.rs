use serde::{Deserialize, Serialize};

use crate::models::history::MatchResult;

#[derive(Debug, Clone, PartialEq)]
pub enum LadderError {
    Empty,
    InvalidTier(String),
    UnknownTier(String),
    Parse(String),
}

impl std::fmt::Display for LadderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LadderError::Empty => write!(f, "Rank ladder has no tiers"),
            LadderError::InvalidTier(msg) => write!(f, "Invalid tier: {}", msg),
            LadderError::UnknownTier(name) => write!(f, "Unknown tier: {}", name),
            LadderError::Parse(msg) => write!(f, "Could not parse rank ladder: {}", msg),
        }
    }
}

impl std::error::Error for LadderError {}

/// How rank points relate to tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LadderStyle {
    /// Points are a running total and the tier is derived from them.
    #[default]
    Cumulative,
    /// Points count inside the current tier and reset when the tier changes.
    Division,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRange {
    pub min: u64,
    pub max: u64,
}

impl StakeRange {
    pub fn contains(&self, stake: u64) -> bool {
        stake >= self.min && stake <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankTier {
    pub name: String,
    pub color: String,
    /// Inclusive lower bound in cumulative points.
    pub min_points: u32,
    /// Exclusive upper bound; only the top tier is open-ended.
    pub max_points: Option<u32>,
    pub stake_range: StakeRange,
    pub points_on_win: u32,
    pub points_on_loss: u32,
    #[serde(default)]
    pub points_on_draw: i32,
    /// Division ladders relegate when a loss would take points below this.
    #[serde(default)]
    pub points_to_relegate: i64,
}

impl RankTier {
    pub fn contains(&self, points: u32) -> bool {
        points >= self.min_points && self.max_points.map_or(true, |max| points < max)
    }

    /// Points needed inside this tier to move up (division ladders). `None` at the top.
    pub fn points_to_promote(&self) -> Option<u32> {
        self.max_points.map(|max| max - self.min_points)
    }

    pub fn points_delta(&self, result: MatchResult) -> i64 {
        match result {
            MatchResult::Win => i64::from(self.points_on_win),
            MatchResult::Loss => -i64::from(self.points_on_loss),
            MatchResult::Draw => i64::from(self.points_on_draw),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMovement {
    Promotion,
    Relegation,
}

/// Effect of one settled match on a player's rank.
#[derive(Debug, Clone, PartialEq)]
pub struct RankChange {
    pub tier_before: String,
    pub points_before: u32,
    pub tier_after: String,
    pub points_after: u32,
    /// Points earned this match after the floor at zero, before any tier reset.
    pub points_delta: i64,
    pub movement: Option<RankMovement>,
}

/// Ordered tiers, lowest first. Loaded once at start-up and shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankLadder {
    #[serde(default)]
    pub style: LadderStyle,
    pub tiers: Vec<RankTier>,
}

fn tier(
    name: &str,
    color: &str,
    min_points: u32,
    max_points: Option<u32>,
    stakes: (u64, u64),
    on_win: u32,
    on_loss: u32,
    on_draw: i32,
) -> RankTier {
    RankTier {
        name: name.to_string(),
        color: color.to_string(),
        min_points,
        max_points,
        stake_range: StakeRange {
            min: stakes.0,
            max: stakes.1,
        },
        points_on_win: on_win,
        points_on_loss: on_loss,
        points_on_draw: on_draw,
        points_to_relegate: 0,
    }
}

impl RankLadder {
    /// Cumulative ladder used unless another one is configured.
    pub fn standard() -> Self {
        RankLadder {
            style: LadderStyle::Cumulative,
            tiers: vec![
                tier("Bronze", "#cd7f32", 0, Some(100), (10, 100), 10, 8, 0),
                tier("Silver", "#c0c0c0", 100, Some(250), (50, 250), 10, 10, 0),
                tier("Gold", "#ffd700", 250, Some(450), (100, 500), 12, 12, 0),
                tier("Platinum", "#e5e4e2", 450, Some(700), (250, 1000), 14, 14, 0),
                tier("Diamond", "#b9f2ff", 700, Some(1000), (500, 2500), 16, 16, 0),
                tier("Champion", "#ff4500", 1000, None, (1000, 10000), 20, 20, 0),
            ],
        }
    }

    /// Division ladder: points reset on promotion, losses can relegate.
    pub fn division() -> Self {
        RankLadder {
            style: LadderStyle::Division,
            tiers: vec![
                tier("Warrior", "#a1a1aa", 0, Some(100), (10, 100), 20, 20, 5),
                tier("Elite", "#78716c", 100, Some(300), (50, 250), 20, 20, 5),
                tier("Master", "#f59e0b", 300, Some(600), (100, 500), 20, 20, 5),
                tier("Grandmaster", "#ef4444", 600, Some(1000), (250, 1000), 20, 20, 5),
                tier("Epic", "#a855f7", 1000, Some(1500), (500, 2500), 20, 20, 5),
                tier("Legend", "#ec4899", 1500, Some(2100), (1000, 5000), 20, 20, 5),
                tier("Mythic", "#3b82f6", 2100, None, (2000, 10000), 20, 20, 5),
            ],
        }
    }

    pub fn from_json(json: &str) -> Result<Self, LadderError> {
        let ladder: RankLadder =
            serde_json::from_str(json).map_err(|e| LadderError::Parse(e.to_string()))?;
        ladder.validate()?;
        Ok(ladder)
    }

    pub fn validate(&self) -> Result<(), LadderError> {
        let first = self.tiers.first().ok_or(LadderError::Empty)?;
        if first.min_points != 0 {
            return Err(LadderError::InvalidTier(format!(
                "{} must start at 0 points",
                first.name
            )));
        }

        let mut names = std::collections::HashSet::new();
        for (index, tier) in self.tiers.iter().enumerate() {
            if tier.name.trim().is_empty() {
                return Err(LadderError::InvalidTier("tier name cannot be empty".to_string()));
            }
            if !names.insert(tier.name.to_lowercase()) {
                return Err(LadderError::InvalidTier(format!("{} is listed twice", tier.name)));
            }
            if tier.stake_range.min > tier.stake_range.max {
                return Err(LadderError::InvalidTier(format!(
                    "{} has an inverted stake range",
                    tier.name
                )));
            }

            let is_last = index + 1 == self.tiers.len();
            match (tier.max_points, is_last) {
                (None, true) => {}
                (None, false) => {
                    return Err(LadderError::InvalidTier(format!(
                        "only the top tier may be open-ended, not {}",
                        tier.name
                    )))
                }
                (Some(_), true) => {
                    return Err(LadderError::InvalidTier(format!(
                        "top tier {} must be open-ended",
                        tier.name
                    )))
                }
                (Some(max), false) => {
                    if max <= tier.min_points {
                        return Err(LadderError::InvalidTier(format!(
                            "{} has an empty point range",
                            tier.name
                        )));
                    }
                    let next = &self.tiers[index + 1];
                    if next.min_points != max {
                        return Err(LadderError::InvalidTier(format!(
                            "{} must start where {} ends",
                            next.name, tier.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn bottom(&self) -> &RankTier {
        &self.tiers[0]
    }

    /// Tier whose cumulative bounds hold `points`.
    pub fn tier_for(&self, points: u32) -> &RankTier {
        let index = self
            .tiers
            .partition_point(|tier| tier.min_points <= points)
            .saturating_sub(1);
        &self.tiers[index]
    }

    pub fn tier(&self, name: &str) -> Option<&RankTier> {
        self.tier_index(name).map(|index| &self.tiers[index])
    }

    fn tier_index(&self, name: &str) -> Option<usize> {
        self.tiers
            .iter()
            .position(|tier| tier.name.eq_ignore_ascii_case(name))
    }

    /// Tier a player is ranked in given the stored tier name and points.
    pub fn current_tier(&self, tier_name: &str, points: u32) -> Result<&RankTier, LadderError> {
        match self.style {
            LadderStyle::Cumulative => Ok(self.tier_for(points)),
            LadderStyle::Division => self
                .tier(tier_name)
                .ok_or_else(|| LadderError::UnknownTier(tier_name.to_string())),
        }
    }

    /// Applies one match result to a player's rank.
    pub fn apply(
        &self,
        tier_name: &str,
        points: u32,
        result: MatchResult,
    ) -> Result<RankChange, LadderError> {
        let current = self.current_tier(tier_name, points)?;
        let raw = i64::from(points) + current.points_delta(result);
        let floored = raw.max(0);
        let points_delta = floored - i64::from(points);

        let (tier_after, points_after, movement) = match self.style {
            LadderStyle::Cumulative => {
                let points_after = u32::try_from(floored).unwrap_or(u32::MAX);
                let before_index = self.tier_index(&current.name).unwrap_or(0);
                let after = self.tier_for(points_after);
                let after_index = self.tier_index(&after.name).unwrap_or(0);
                let movement = match after_index.cmp(&before_index) {
                    std::cmp::Ordering::Greater => Some(RankMovement::Promotion),
                    std::cmp::Ordering::Less => Some(RankMovement::Relegation),
                    std::cmp::Ordering::Equal => None,
                };
                (after.name.clone(), points_after, movement)
            }
            LadderStyle::Division => {
                let index = self.tier_index(&current.name).unwrap_or(0);
                match current.points_to_promote() {
                    Some(threshold) if raw >= i64::from(threshold) => (
                        self.tiers[index + 1].name.clone(),
                        0,
                        Some(RankMovement::Promotion),
                    ),
                    _ if raw < current.points_to_relegate && index > 0 => {
                        let lower = &self.tiers[index - 1];
                        let landing = lower.points_to_promote().unwrap_or(1).saturating_sub(1);
                        (lower.name.clone(), landing, Some(RankMovement::Relegation))
                    }
                    _ => (
                        current.name.clone(),
                        u32::try_from(floored).unwrap_or(u32::MAX),
                        None,
                    ),
                }
            }
        };

        Ok(RankChange {
            tier_before: current.name.clone(),
            points_before: points,
            tier_after,
            points_after,
            points_delta,
            movement,
        })
    }
}

impl Default for RankLadder {
    fn default() -> Self {
        RankLadder::standard()
    }
}
