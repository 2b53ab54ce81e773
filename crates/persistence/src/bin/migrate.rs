#![deny(warnings)]

use persistence::default_sqlite_url;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("RFA_DATABASE_URL").ok())
        .unwrap_or_else(|| default_sqlite_url().to_string());
    persistence::ensure_sqlite_dir(&url)?;
    let pool = persistence::init_db(&url).await?;
    let mut registry = persistence::load_registry(&pool).await?;
    if registry.is_empty() {
        let standard = registry.seed_standard_contract()?;
        persistence::save_registry(&pool, &registry).await?;
        println!("Seeded standard contract {} ({})", standard.name, standard.id);
    }
    println!("DB migrated at {}", url);
    Ok(())
}
