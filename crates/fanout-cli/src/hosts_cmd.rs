//! `fanout hosts` command: show the parsed fleet without connecting.

use anyhow::{Context, Result};

use fanout_core::host::Fleet;

use crate::config::{self, Overrides};

/// Parse the fleet file and print one resolved target per line.
pub fn run_hosts(overrides: &Overrides) -> Result<()> {
    let hosts_file = config::resolve_hosts_file(overrides).context("failed to load configuration")?;
    let fleet = Fleet::load(&hosts_file)
        .with_context(|| format!("invalid hosts file {}", hosts_file.display()))?;

    print!("{}", render_fleet(&fleet));
    println!("{} host(s) in {}", fleet.len(), hosts_file.display());
    Ok(())
}

/// Render the fleet as an aligned `ADDRESS  PORT` table.
fn render_fleet(fleet: &Fleet) -> String {
    let width = fleet
        .iter()
        .map(|h| h.address().len())
        .max()
        .unwrap_or(0)
        .max("ADDRESS".len());

    let mut out = format!("{:<width$}  PORT\n", "ADDRESS");
    for host in fleet {
        out.push_str(&format!("{:<width$}  {}\n", host.address(), host.port()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_aligns_columns() {
        let fleet = Fleet::parse("alice@10.0.0.1\nbob@db:2200\n").unwrap();
        assert_eq!(
            render_fleet(&fleet),
            "ADDRESS         PORT\n\
             alice@10.0.0.1  22\n\
             bob@db          2200\n"
        );
    }

    #[test]
    fn render_empty_fleet_is_header_only() {
        assert_eq!(render_fleet(&Fleet::default()), "ADDRESS  PORT\n");
    }
}
