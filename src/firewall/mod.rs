//! nftables rules redirecting DNS traffic into the kernel queue.
//!
//! The rules live in a dedicated table so that installing and removing them
//! never touches anything else on the host. Both operations are single
//! atomic nft scripts and both are idempotent: a stale table left behind by a
//! crashed run is replaced, and removing an absent table succeeds.

mod nft;

use std::fmt::Write as _;
use std::future::Future;
use std::io;

use tracing::{error, info, warn};

use crate::network::packet::DNS_PORT;

pub use nft::NftApplier;

/// Address family of the rule table. `inet` covers IPv4 and IPv6.
const TABLE_FAMILY: &str = "inet";

/// Error type for firewall operations.
#[derive(Debug, thiserror::Error)]
pub enum FirewallError {
    /// The rule tool ran but rejected the script, or printed something.
    #[error("rule application failed ({status}):\n---- script:\n{script}\n---- output:\n{output}")]
    Apply {
        /// Script that was applied.
        script: String,
        /// Combined stdout and stderr of the tool.
        output: String,
        /// Exit status of the tool.
        status: String,
    },

    /// The rule tool could not be run at all.
    #[error("failed to run {binary}: {source}")]
    Spawn {
        /// Binary that was spawned.
        binary: String,
        #[source]
        source: io::Error,
    },
}

/// What the rule tool reported for one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutput {
    pub success: bool,
    pub status: String,
    pub output: String,
}

/// Trait for applying rule scripts to the kernel.
pub trait RuleApplier {
    /// Apply one script atomically.
    ///
    /// Only failures to run the tool are errors here; a script rejected by
    /// the tool is reported through [`ApplyOutput`].
    fn apply(&self, script: &str) -> impl Future<Output = Result<ApplyOutput, FirewallError>>;
}

/// Declarative description of the redirect rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    table: String,
    queue: u16,
}

impl RuleSet {
    /// Rules sending DNS traffic to `queue`, in table `table`.
    ///
    /// Every rule carries `bypass`: when no process is bound to the queue
    /// the kernel accepts the traffic instead of dropping it.
    pub fn new(table: impl Into<String>, queue: u16) -> Self {
        Self {
            table: table.into(),
            queue,
        }
    }

    /// Script replacing any previous table with a fresh one.
    ///
    /// Responses are caught on the way in (`sport 53`, prerouting) and
    /// questions on the way out (`dport 53`, postrouting).
    pub fn install_script(&self) -> String {
        let mut script = self.remove_script();
        let _ = writeln!(script);
        let _ = writeln!(script, "table {TABLE_FAMILY} {} {{", self.table);
        self.write_chain(&mut script, "prerouting", "sport");
        self.write_chain(&mut script, "postrouting", "dport");
        let _ = writeln!(script, "}}");
        script
    }

    /// Script deleting the table.
    ///
    /// Declaring the table first turns the delete into a no-op when the
    /// table is absent.
    pub fn remove_script(&self) -> String {
        format!(
            "table {TABLE_FAMILY} {table} {{\n}}\n\ndelete table {TABLE_FAMILY} {table}\n",
            table = self.table
        )
    }

    fn write_chain(&self, script: &mut String, hook: &str, port_match: &str) {
        let _ = writeln!(script, "\tchain {hook} {{");
        let _ = writeln!(
            script,
            "\t\ttype filter hook {hook} priority filter; policy accept;"
        );
        let _ = writeln!(
            script,
            "\t\tmeta l4proto udp udp {port_match} {DNS_PORT} queue num {} bypass",
            self.queue
        );
        let _ = writeln!(script, "\t}}");
    }
}

/// Installs and removes a [`RuleSet`] through a [`RuleApplier`].
pub struct FirewallRules<A> {
    rules: RuleSet,
    applier: A,
}

impl<A: RuleApplier> FirewallRules<A> {
    pub const fn new(rules: RuleSet, applier: A) -> Self {
        Self { rules, applier }
    }

    /// Install the rules, replacing a stale table if one exists.
    ///
    /// On failure, a best-effort removal runs before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`FirewallError`] if the tool cannot be run or rejects the
    /// script.
    pub async fn install(&self) -> Result<(), FirewallError> {
        let script = self.rules.install_script();
        if let Err(err) = self.run(script).await {
            warn!(table = %self.rules.table, "rule installation failed, rolling back");
            self.teardown().await;
            return Err(err);
        }

        info!(
            table = %self.rules.table,
            queue = self.rules.queue,
            "firewall rules installed"
        );
        Ok(())
    }

    /// Remove the rules. Succeeds when they are already gone.
    ///
    /// # Errors
    ///
    /// Returns [`FirewallError`] if the tool cannot be run or rejects the
    /// script.
    pub async fn remove(&self) -> Result<(), FirewallError> {
        self.run(self.rules.remove_script()).await?;
        info!(table = %self.rules.table, "firewall rules removed");
        Ok(())
    }

    /// Remove the rules, logging instead of returning a failure.
    pub async fn teardown(&self) {
        if let Err(err) = self.remove().await {
            error!(table = %self.rules.table, error = %err, "failed to remove firewall rules");
        }
    }

    async fn run(&self, script: String) -> Result<(), FirewallError> {
        let result = self.applier.apply(&script).await?;

        // nft is silent on success; anything printed is worth surfacing.
        if !result.success || !result.output.trim().is_empty() {
            error!(
                script = %script,
                output = %result.output,
                status = %result.status,
                "nft rejected rule script"
            );
            return Err(FirewallError::Apply {
                script,
                output: result.output,
                status: result.status,
            });
        }
        Ok(())
    }
}
