//! Analysis lifecycle commands.

use chrono::NaiveDate;

use super::AppContext;

pub async fn cmd_prepare(
    ctx: &AppContext,
    date: NaiveDate,
    region: Option<&str>,
    max_messages: Option<usize>,
) -> anyhow::Result<()> {
    let created = ctx.service.prepare(date, region, max_messages).await?;
    println!("Prepared {created} analysis records for {date}");
    Ok(())
}

pub async fn cmd_run(ctx: &AppContext, id: uuid::Uuid) -> anyhow::Result<()> {
    ctx.service.run(id).await?;
    println!("Analysis {id} published for processing");
    Ok(())
}

pub async fn cmd_run_ranked(ctx: &AppContext, max_messages: Option<usize>) -> anyhow::Result<()> {
    let published = ctx.service.run_ranked(max_messages).await?;
    println!("Published {published} analyses from the ranked backlog");
    Ok(())
}

pub async fn cmd_retry(ctx: &AppContext) -> anyhow::Result<()> {
    let republished = ctx.service.retry().await?;
    println!("Re-published {republished} analyses for retry");
    Ok(())
}

pub async fn cmd_reclaim_stuck(ctx: &AppContext) -> anyhow::Result<()> {
    let reclaimed = ctx.service.reclaim_stuck().await?;
    println!("Marked {reclaimed} stuck analyses as timed out");
    Ok(())
}
