//! Demo command - one pass through the marketplace
//!
//! Two agents are configured, started and listed; one is rented, used and
//! cancelled, the other sold. Tasks and ratings follow, then the owner's
//! progress and the leaderboards are printed.

use agentmart_engine::{Engine, EngineConfig};
use agentmart_types::{
    AgentConfig, AgentId, Decimal, LeaderboardCategory, ListingType, PricingModel, UserId,
};
use colored::*;

use crate::display;

pub async fn run_demo(config: &EngineConfig) -> anyhow::Result<()> {
    println!("{}", "AgentMart demo: rent, sell, rate".bright_white().bold());

    let engine = Engine::new(config)?;
    let result = run_scenario(&engine).await;
    engine.shutdown().await;
    result
}

async fn run_scenario(engine: &Engine) -> anyhow::Result<()> {
    let owner = UserId::new();
    let buyer = UserId::new();
    let renter = UserId::new();

    // ===== Agents =====
    display::section("Step 1: Register agents");
    let atlas = engine
        .register_agent_with_config(
            &owner,
            "Atlas",
            "Market research analyst",
            AgentConfig::new("analyst-large")
                .with_tool("web_search")
                .with_allowed_import("csv"),
        )
        .await?;
    let muse = engine
        .register_agent(&owner, "Muse", "Marketing copywriter")
        .await?;
    for agent in [&atlas, &muse] {
        let started = engine.start_agent(&agent.id).await?;
        display::success(&format!(
            "Registered {} ({}), model {}, {}",
            started.name, started.id, started.config.model, started.state
        ));
    }
    display::kv("owner", &owner.to_string());
    display::kv("tools", &atlas.config.tools.join(", "));

    // ===== Listings =====
    display::section("Step 2: List them on the marketplace");
    let sale = engine
        .create_listing(&atlas.id, ListingType::Sale, PricingModel::fixed(Decimal::from(1200)))
        .await?;
    let rent = engine
        .create_listing(
            &muse.id,
            ListingType::Rent,
            PricingModel::fixed(Decimal::from(25)).with_usage_fee(Decimal::new(150, 2)),
        )
        .await?;
    display::success(&format!(
        "{} listed for {} at {}",
        atlas.name,
        sale.listing_type,
        display::money(sale.pricing.base_price)
    ));
    display::success(&format!(
        "{} listed for {} at {} + {} per use",
        muse.name,
        rent.listing_type,
        display::money(rent.pricing.base_price),
        display::money(rent.pricing.usage_fee.unwrap_or_default())
    ));

    // ===== Rental =====
    display::section("Step 3: Rent, use, cancel");
    let started = engine.create_rental(&rent.id, &renter).await?;
    let rental = started.rental;
    display::success(&format!(
        "Rental {} started (tx {})",
        rental.id, started.recorded.transaction.id
    ));

    match engine.create_rental(&rent.id, &buyer).await {
        Ok(_) => display::error("Second rental unexpectedly accepted"),
        Err(e) => display::info(&format!("Second renter turned away: {}", e)),
    }

    for _ in 0..3 {
        engine.record_usage(&rental.id).await?;
    }
    let cancelled = engine.cancel_rental(&rental.id).await?;
    display::success(&format!(
        "Rental {} after {} uses",
        format!("{:?}", cancelled.status).to_lowercase(),
        cancelled.usage_count
    ));

    // ===== Sale =====
    display::section("Step 4: Sell");
    let tx = engine.record_transaction(&sale.id, &buyer).await?;
    display::success(&format!(
        "{} sold for {} (tx {})",
        atlas.name,
        display::money(tx.amount),
        tx.id
    ));
    match engine
        .create_listing(&atlas.id, ListingType::Rent, PricingModel::fixed(Decimal::from(5)))
        .await
    {
        Ok(_) => display::error("Sold agent was listed again"),
        Err(e) => display::info(&format!("Relisting refused: {}", e)),
    }

    // ===== Work =====
    display::section("Step 5: Tasks and ratings");
    let outcome = engine.run_task(&muse.id, "write a launch tagline").await?;
    display::info(&outcome.output);
    engine.run_task(&atlas.id, "size the agent market").await?;
    engine.record_rating(&atlas.id, 5.0).await?;
    engine.record_rating(&muse.id, 4.5).await?;
    display::success("Two tasks completed, two ratings recorded");

    let evaluation = engine.record_tool_created(&owner).await?;
    for achievement in &evaluation.granted {
        display::unlocked(achievement);
    }

    // ===== Progress =====
    display::section("Owner progress");
    let progress = engine.user_progress(&owner).await?;
    display::kv("level", &progress.level.to_string());
    display::kv("points", &progress.total_points.to_string());
    display::kv("badges", &progress.badges.join(" "));
    for achievement in engine
        .catalog()
        .iter()
        .filter(|a| progress.has_achievement(&a.id))
    {
        display::unlocked(achievement);
    }

    // ===== Leaderboards =====
    display::section("Leaderboards");
    for category in LeaderboardCategory::standard() {
        println!("  {}", category.to_string().to_uppercase().bright_white());
        for (rank, entry) in engine.leaderboard(&category, 5)?.iter().enumerate() {
            println!(
                "    {}. {:<8} {:>10.2}",
                rank + 1,
                agent_name(engine, &entry.agent_id).await,
                entry.score
            );
        }
    }

    let stats = engine.retry_stats();
    if stats.deferred > 0 {
        display::info(&format!(
            "{} follow-ups deferred, {} dead-lettered",
            stats.deferred, stats.dead_lettered
        ));
    }
    Ok(())
}

async fn agent_name(engine: &Engine, agent_id: &AgentId) -> String {
    engine
        .agent(agent_id)
        .await
        .map(|a| a.name)
        .unwrap_or_else(|_| agent_id.to_string())
}
