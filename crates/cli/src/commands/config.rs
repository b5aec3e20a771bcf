// Effective configuration inspection

use anyhow::Result;

use super::EngineArgs;
use crate::output::{print_field, OutputFormat};

pub fn run(args: &EngineArgs, output: OutputFormat) -> Result<()> {
    let config = args.resolve()?;

    if !output.is_text() {
        return output.print_value(&config);
    }

    print_field("Strategy", &config.strategy.to_string());
    print_field("Workers", &config.number_of_workers.to_string());
    print_field("Timeout", &format!("{}ms", config.timeout.as_millis()));
    let args = if config.launch_options.args.is_empty() {
        "-".to_string()
    } else {
        config.launch_options.args.join(",")
    };
    print_field("Launch args", &args);
    print_field(
        "Executable",
        config.launch_options.executable_path.as_deref().unwrap_or("-"),
    );
    Ok(())
}
