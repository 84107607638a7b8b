//! Local arena for the match engine.
//!
//! Two simulated participants queue, play and settle duels against an in-memory store,
//! running exactly the loop a real client runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use shared::config::rank_ladder::{LadderStyle, RankLadder};
use shared::config::EngineConfig;
use shared::models::history::MatchResult;
use shared::models::player::PlayerProfile;
use shared::models::queue::BucketKey;
use shared::models::win_condition::MatchMode;
use shared::repositories::memory_store::InMemoryStore;
use shared::services::history_service::HistoryService;
use shared::services::match_driver::{ActionSource, MatchDriver, MatchReport};
use shared::services::match_session_service::MatchSessionService;
use shared::services::matchmaking_service::MatchmakingService;
use shared::services::profile_service::ProfileService;
use shared::services::score_service::ScoreService;
use shared::services::settlement_service::SettlementService;

type Error = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "arena-sim")]
#[command(about = "Simulated duels through matchmaking, play and settlement", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LadderChoice {
    Standard,
    Division,
}

impl LadderChoice {
    fn ladder(self) -> RankLadder {
        match self {
            LadderChoice::Standard => RankLadder::standard(),
            LadderChoice::Division => RankLadder::division(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Play duels between two simulated players
    Duel {
        /// Wager this stake per duel; ranked duels when omitted
        #[arg(long)]
        stake: Option<u64>,

        /// Number of duels to play
        #[arg(long, default_value = "1")]
        rounds: u32,

        /// Built-in ladder to rank against
        #[arg(long, value_enum, default_value = "standard")]
        ladder: LadderChoice,

        /// Play first-to-N rounds instead of a timed tap race
        #[arg(long)]
        first_to: Option<u32>,

        #[arg(long, default_value = "500")]
        countdown_ms: u64,

        #[arg(long, default_value = "3000")]
        duration_ms: u64,

        /// Average time between taps for each player
        #[arg(long, default_value = "120")]
        mean_tap_ms: u64,

        #[arg(long, default_value = "Ada")]
        player1: String,

        #[arg(long, default_value = "Grace")]
        player2: String,
    },

    /// Print the tiers of a rank ladder
    Ladder {
        #[arg(long, value_enum, default_value = "standard")]
        ladder: LadderChoice,

        /// Load and validate a ladder from a JSON file instead
        #[arg(long)]
        file: Option<String>,
    },
}

/// Taps at a jittered pace around `mean` until the match ends.
struct RandomTaps {
    rng: StdRng,
    mean: Duration,
}

#[async_trait]
impl ActionSource for RandomTaps {
    async fn next_action(&mut self) -> bool {
        let factor: f64 = self.rng.gen_range(0.5..1.5);
        tokio::time::sleep(self.mean.mul_f64(factor)).await;
        true
    }
}

struct Arena {
    profiles: ProfileService,
    history: HistoryService,
    driver: MatchDriver,
    search_timeout: Duration,
}

impl Arena {
    fn new(config: &EngineConfig, mode: MatchMode) -> Self {
        // Create services
        let store = Arc::new(InMemoryStore::new());
        let ladder = Arc::new(config.ladder.clone());
        let timings = config.session_timings();

        let matchmaking =
            MatchmakingService::new(store.clone(), ladder.clone(), config.retry.clone(), timings)
                .with_mode(mode);
        let driver = MatchDriver::new(
            matchmaking,
            MatchSessionService::new(store.clone(), config.retry.clone()),
            ScoreService::new(store.clone(), config.retry.clone()),
            SettlementService::new(
                store.clone(),
                ladder.clone(),
                config.retry.clone(),
                config.history_retention,
            ),
        );

        Arena {
            profiles: ProfileService::new(
                store.clone(),
                ladder,
                config.retry.clone(),
                config.starting_balance,
            ),
            history: HistoryService::new(store, config.history_page_size),
            driver,
            search_timeout: config.countdown + config.match_duration + Duration::from_secs(5),
        }
    }

    fn bucket_for(&self, profile: &PlayerProfile, stake: Option<u64>) -> Result<BucketKey, Error> {
        Ok(match stake {
            Some(stake) => BucketKey::Stake(stake),
            None => BucketKey::for_tier(&self.profiles.tier_of(profile)?.name),
        })
    }

    async fn duel(
        &self,
        players: [&str; 2],
        stake: Option<u64>,
        mean_tap: Duration,
    ) -> Result<Vec<Option<MatchReport>>, Error> {
        let mut handles = Vec::new();
        for (index, player) in players.iter().enumerate() {
            let profile = self.profiles.get_profile(player).await?;
            let bucket = self.bucket_for(&profile, stake)?;
            let driver = self.driver.clone();
            let timeout = self.search_timeout;
            handles.push(tokio::spawn(async move {
                // Stagger arrivals so one player waits and the other matches.
                tokio::time::sleep(Duration::from_millis(50 * index as u64)).await;
                let mut taps = RandomTaps {
                    rng: StdRng::from_entropy(),
                    mean: mean_tap,
                };
                driver
                    .run(
                        &profile.player_id,
                        &profile.display_name,
                        bucket,
                        timeout,
                        &mut taps,
                    )
                    .await
            }));
        }

        let mut reports = Vec::new();
        for handle in handles {
            reports.push(handle.await??);
        }
        Ok(reports)
    }
}

fn print_ladder(ladder: &RankLadder) {
    let style = match ladder.style {
        LadderStyle::Cumulative => "cumulative",
        LadderStyle::Division => "division",
    };
    println!("{} ({} ladder)", "Rank ladder".bold(), style);
    for tier in &ladder.tiers {
        let bounds = match tier.max_points {
            Some(max) => format!("{}-{}", tier.min_points, max - 1),
            None => format!("{}+", tier.min_points),
        };
        println!(
            "  {:<12} {:>10} RP  win +{:<3} loss -{:<3} draw {:+}  stakes {}-{}",
            tier.name.bold(),
            bounds,
            tier.points_on_win,
            tier.points_on_loss,
            tier.points_on_draw,
            tier.stake_range.min,
            tier.stake_range.max
        );
    }
}

fn print_report(player: &str, report: &Option<MatchReport>) {
    let Some(report) = report else {
        println!("  {}: {}", player, "no opponent found".yellow());
        return;
    };
    let session = &report.session;
    let Some(settlement) = &report.settlement else {
        println!("  {}: match {} {}", player, session.match_id, "cancelled".yellow());
        return;
    };
    let result = match settlement.result {
        MatchResult::Win => "WIN".green().bold(),
        MatchResult::Loss => "LOSS".red().bold(),
        MatchResult::Draw => "DRAW".blue().bold(),
    };
    let movement = settlement
        .movement
        .map(|movement| format!(" ({:?})", movement))
        .unwrap_or_default();
    println!(
        "  {}: {} {}-{}  balance {:+} -> {}  RP {:+}  {} -> {}{}",
        player,
        result,
        session.player1.score,
        session.player2.score,
        settlement.balance_delta,
        settlement.balance_after,
        settlement.rank_points_delta,
        settlement.tier_before,
        settlement.tier_after,
        movement
    );
}

async fn run_duels(
    config: EngineConfig,
    mode: MatchMode,
    names: [String; 2],
    stake: Option<u64>,
    rounds: u32,
    mean_tap: Duration,
) -> Result<(), Error> {
    // Set up the arena and register both players
    let arena = Arena::new(&config, mode);
    let ids = ["player-1", "player-2"];
    for (id, name) in ids.iter().zip(names.iter()) {
        arena.profiles.register(id, name).await?;
    }

    for round in 1..=rounds {
        println!("{}", format!("Duel {} of {}", round, rounds).bold());
        let reports = arena.duel(ids, stake, mean_tap).await?;
        for (name, report) in names.iter().zip(reports.iter()) {
            print_report(name, report);
        }
        if reports.iter().any(Option::is_none) {
            warn!("Players ended up in different buckets; stopping");
            break;
        }
    }

    // Print final standings and recent history
    println!("{}", "Standings".bold());
    for (id, name) in ids.iter().zip(names.iter()) {
        let profile = arena.profiles.get_profile(id).await?;
        println!(
            "  {}: balance {}  {} {} RP  W{} L{} D{}",
            name,
            profile.balance,
            profile.rank_tier,
            profile.rank_points,
            profile.wins,
            profile.losses,
            profile.draws
        );
        let page = arena.history.get_page(id, 0).await?;
        for entry in &page.entries {
            println!(
                "    {} vs {:<10} {:?} {:+} coins {:+} RP",
                entry.timestamp.format("%H:%M:%S"),
                entry.opponent_display_name,
                entry.result,
                entry.balance_delta,
                entry.rank_points_delta
            );
        }
        if page.has_more {
            println!("    ... {} more", page.total_entries - page.entries.len());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    match cli.command {
        Commands::Duel {
            stake,
            rounds,
            ladder,
            first_to,
            countdown_ms,
            duration_ms,
            mean_tap_ms,
            player1,
            player2,
        } => {
            let config = EngineConfig {
                countdown: Duration::from_millis(countdown_ms),
                match_duration: Duration::from_millis(duration_ms),
                ladder: ladder.ladder(),
                ..EngineConfig::from_env()?
            };
            let mode = match first_to {
                Some(target) => MatchMode::FirstTo { target },
                None => MatchMode::TapRace,
            };
            info!("Starting {} duel(s) in {:?} mode", rounds, mode);
            run_duels(
                config,
                mode,
                [player1, player2],
                stake,
                rounds,
                Duration::from_millis(mean_tap_ms),
            )
            .await
        }
        Commands::Ladder { ladder, file } => {
            let ladder = match file {
                Some(path) => RankLadder::from_json(&std::fs::read_to_string(path)?)?,
                None => ladder.ladder(),
            };
            print_ladder(&ladder);
            Ok(())
        }
    }
}
