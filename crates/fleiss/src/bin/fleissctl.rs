use chrono::Utc;
use fleiss::db;
use fleiss::jobs::{JobStore, NewJob, Payload, PgJobStore};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "fleissctl <command>\n\
             Commands:\n\
             - migrate\n\
             - reset\n\
             - enqueue <queue> <handler> [args_json] [priority] [delay_secs]\n\
             - seed <n>\n\
             - stats\n\
             - show <job_id>\n\
             \n\
             Uses DATABASE_URL or TEST_DATABASE_URL.\n"
        );
        std::process::exit(2);
    }

    dotenvy::dotenv().ok();
    let url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL or TEST_DATABASE_URL must be set"))?;

    let pool = db::make_pool(&url, 1).await?;
    let store = PgJobStore::new(pool.clone());

    match args[1].as_str() {
        "migrate" => {
            db::run_migrations(&pool).await?;
            println!("migrations OK");
        }
        "reset" => reset(&pool).await?,
        "enqueue" => {
            let (Some(queue), Some(handler)) = (args.get(2), args.get(3)) else {
                anyhow::bail!("usage: fleissctl enqueue <queue> <handler> [args_json] [priority] [delay_secs]");
            };
            let job_args: Value = match args.get(4) {
                Some(raw) => serde_json::from_str(raw)?,
                None => Value::Null,
            };
            let priority: i16 = args.get(5).map(|s| s.parse::<i16>()).transpose()?.unwrap_or(10);
            let delay_secs: i64 = args.get(6).map(|s| s.parse::<i64>()).transpose()?.unwrap_or(0);
            let scheduled_at = chrono::Duration::try_seconds(delay_secs)
                .and_then(|delay| Utc::now().checked_add_signed(delay))
                .ok_or_else(|| anyhow::anyhow!("delay_secs {delay_secs} is out of range"))?;

            let id = store
                .enqueue(
                    NewJob::new(queue.as_str(), Payload::new(handler.as_str(), job_args).encode())
                        .priority(priority)
                        .scheduled_at(scheduled_at),
                )
                .await?;
            println!("enqueued job id={id}");
        }
        "seed" => {
            let n: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
            seed(&store, n).await?;
        }
        "stats" => show_stats(&store).await?,
        "show" => {
            let id: i64 = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("usage: fleissctl show <job_id>"))?
                .parse()?;
            match store.get(id).await? {
                Some(job) => {
                    println!("{}", serde_json::to_string_pretty(&job)?);
                    println!("state: {:?}", job.state(Utc::now()));
                }
                None => println!("job {id} not found"),
            }
        }
        other => {
            eprintln!("Unknown command: {other}");
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn reset(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("TRUNCATE TABLE fleiss_jobs RESTART IDENTITY")
        .execute(pool)
        .await?;

    println!("reset OK");
    Ok(())
}

async fn seed(store: &PgJobStore, n: i64) -> anyhow::Result<()> {
    for i in 0..n {
        // mostly successes, every fifth one fails and waits for its deadline
        let handler = if i % 5 == 4 { "fail_me" } else { "demo_ok" };
        let now = Utc::now();
        store
            .enqueue(
                NewJob::new("default", Payload::new(handler, json!({ "seq": i })).encode())
                    .priority((i % 3) as i16 * 10)
                    .scheduled_at(now)
                    .expires_at(now + chrono::Duration::minutes(5)),
            )
            .await?;
    }

    println!("seeded {n} jobs");
    Ok(())
}

async fn show_stats(store: &PgJobStore) -> anyhow::Result<()> {
    let stats = store.stats(Utc::now()).await?;
    if stats.is_empty() {
        println!("no jobs");
        return Ok(());
    }

    println!(
        "{:<20} {:>8} {:>10} {:>12} {:>10} {:>8}",
        "queue", "pending", "scheduled", "in_progress", "abandoned", "done"
    );
    for s in stats {
        println!(
            "{:<20} {:>8} {:>10} {:>12} {:>10} {:>8}",
            s.queue_name, s.pending, s.scheduled, s.in_progress, s.abandoned, s.done
        );
    }
    Ok(())
}
