#![deny(warnings)]

//! Headless CLI: seeds a town, runs a scripted day of player activity, and
//! prints end-of-run KPIs. Useful for smoke-testing the engine stack and
//! for eyeballing tuning changes without a client.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sim_core::{BuildingKind, HeistPlan, ItemId, MapPos, ParameterName, PlayerId, TownTemplate};
use sim_runtime::{Town, TownTuning};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

struct Args {
    players: usize,
    tuning: Option<String>,
}

fn parse_args() -> Args {
    let mut args = Args {
        players: 12,
        tuning: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--players" => {
                if let Some(n) = it.next().and_then(|s| s.parse().ok()) {
                    args.players = n;
                }
            }
            "--tuning" => args.tuning = it.next(),
            _ => {}
        }
    }
    args
}

fn load_tuning(path: Option<&str>) -> Result<TownTuning> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading tuning file {path}"))?;
            serde_yaml::from_str(&raw).with_context(|| format!("parsing tuning file {path}"))
        }
        None => Ok(TownTuning::default()),
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    info!(
        players = args.players,
        git_sha = env!("GIT_SHA"),
        "starting town demo"
    );

    let tuning = load_tuning(args.tuning.as_deref())?;
    let t0 = Utc::now();
    let town = Town::new(tuning, std::sync::Arc::new(sim_runtime::TracingSink), t0)
        .context("invalid tuning")?;
    for item in sim_runtime::seed_items() {
        town.stock_item(item);
    }
    let town = seed(town, args.players)?;

    // -- a scripted day ------------------------------------------------------

    let mayor = PlayerId::new("p0");
    let shop = town.place_building(&mayor, BuildingKind::Shop, MapPos { x: 20.0, y: 20.0 }, t0)?;
    let noon = t0 + Duration::hours(6);
    let collected = town.collect_building(&mayor, &shop.id, noon)?;

    let mut trades = 0u32;
    let mut frozen = 0u32;
    for (i, item) in ["wood", "stone", "apple", "hammer"].iter().enumerate() {
        for round in 0..args.players.min(6) {
            let player = PlayerId::new(format!("p{round}"));
            let at = noon + Duration::seconds((i * 10 + round) as i64);
            match town.buy_item(&player, &ItemId::new(*item), 3, at) {
                Ok(_) => trades += 1,
                Err(sim_runtime::TownError::ItemFrozen(_)) => frozen += 1,
                Err(err) => info!(%err, item = *item, "trade rejected"),
            }
        }
    }

    let policy = town.propose_policy(
        &mayor,
        ParameterName::packaging_tax(),
        Decimal::new(10, 2),
        "Reduce Packaging Tax",
        "Scripted demo proposal",
        noon,
    )?;
    for i in 0..args.players {
        let _ = town.vote_policy(&PlayerId::new(format!("p{i}")), &policy.id, i % 4 != 0, noon);
    }
    let after_vote = policy.expires_at + Duration::minutes(1);
    let settled = town.policy(&policy.id, after_vote)?;

    let heist_outcome = if args.players >= 2 {
        let lead = PlayerId::new("p0");
        let mate = PlayerId::new("p1");
        let heist = town.create_heist(&lead, "museum_gallery")?;
        town.set_heist_plan(
            &lead,
            &heist.id,
            HeistPlan {
                waypoints: vec![MapPos { x: 5.0, y: 5.0 }, MapPos { x: 9.0, y: 2.0 }],
                leader_entry_offset: Some(0),
                partner_entry_offset: Some(60),
            },
        )?;
        town.invite_heist_partner(&lead, &heist.id, &mate)?;
        town.accept_heist_invite(&mate, &heist.id)?;
        town.ready_heist(&lead, &heist.id)?;
        let night = noon + Duration::hours(10);
        town.start_heist(&lead, &heist.id, night)?;
        let mut status = heist.status;
        for i in 0..heist.total_objectives {
            let at = night + Duration::minutes(2 * (i as i64 + 1));
            status = town
                .complete_heist_objective(&lead, &heist.id, i, at)?
                .status;
        }
        format!("{status:?}")
    } else {
        "skipped".to_string()
    };

    let params = town.parameters();
    println!(
        "Town OK | players: {} | catalog: {} | active policies: {}",
        args.players,
        town.catalog().len(),
        town.active_policies(after_vote).len()
    );
    println!(
        "KPI | collected: {} | trades: {} | frozen: {} | policy: {:?} | tax: {} | heist: {}",
        collected,
        trades,
        frozen,
        settled.status,
        params.value(&ParameterName::packaging_tax()),
        heist_outcome
    );

    Ok(())
}

fn seed(town: Town, players: usize) -> Result<Town> {
    for i in 0..players {
        let template = match i % 3 {
            0 => TownTemplate::Starter,
            1 => TownTemplate::Balanced,
            _ => TownTemplate::Creator,
        };
        town.create_player(PlayerId::new(format!("p{i}")), format!("Player {i}"), template)?;
    }
    Ok(town)
}
