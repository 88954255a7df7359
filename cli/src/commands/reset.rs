use anyhow::Result;
use capture_core::CaptureId;
use clap::Args;
use pipeline::OperatorApi;

use crate::output;

#[derive(Args)]
pub struct ResetArgs {
    #[arg(help = "Capture id")]
    pub id: String,

    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

pub async fn run(operator: &OperatorApi, args: ResetArgs) -> Result<()> {
    let capture = operator.reset_to_pending(&CaptureId::new(args.id)).await?;
    if args.json {
        return output::json(&capture);
    }

    output::success(&format!(
        "{} is pending again ({})",
        capture.id,
        output::status(capture.status)
    ));
    output::hint("the next recovery pass picks it up");
    Ok(())
}
