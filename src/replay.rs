//! Command script replay
//!
//! Drives the coordinator from a JSON-lines script. Scripts refer to users,
//! items and swaps by alias; each user alias holds a session issued by the
//! [`SessionRegistry`], and every actor is resolved through it.
//!
//! ```text
//! {"op":"bootstrap_admin","alias":"root"}
//! {"op":"register","alias":"alice"}
//! {"op":"create_item","actor":"alice","alias":"coat","title":"Coat",...}
//! {"op":"approve","actor":"root","item":"coat"}
//! {"op":"redeem","actor":"bob","item":"coat"}
//! ```

use anyhow::Context;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::coordinator::ExchangeCoordinator;
use crate::core_types::{ItemId, Points, SwapId, UserId};
use crate::error::ExchangeError;
use crate::identity::{Actor, IdentityProvider, SessionRegistry, SessionToken};
use crate::items::{ItemDraft, ItemPatch};
use crate::user_account::User;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    BootstrapAdmin {
        alias: String,
        #[serde(default)]
        display_name: Option<String>,
    },
    Register {
        alias: String,
        #[serde(default)]
        display_name: Option<String>,
    },
    Login {
        user: String,
    },
    Logout {
        user: String,
    },
    Grant {
        actor: String,
        to: String,
        amount: Points,
    },
    Correct {
        actor: String,
        from: String,
        to: String,
        amount: Points,
    },
    CreateItem {
        actor: String,
        alias: String,
        #[serde(flatten)]
        draft: ItemDraft,
    },
    UpdateItem {
        actor: String,
        item: String,
        patch: ItemPatch,
    },
    WithdrawItem {
        actor: String,
        item: String,
    },
    Approve {
        actor: String,
        item: String,
    },
    Reject {
        actor: String,
        item: String,
    },
    Feature {
        actor: String,
        item: String,
        #[serde(default = "default_true")]
        featured: bool,
    },
    RequestSwap {
        actor: String,
        item: String,
        alias: String,
        #[serde(default)]
        message: String,
    },
    Respond {
        actor: String,
        swap: String,
        accept: bool,
    },
    Cancel {
        actor: String,
        swap: String,
    },
    Settle {
        actor: String,
        swap: String,
    },
    Redeem {
        actor: String,
        item: String,
    },
    Ban {
        actor: String,
        user: String,
    },
    Unban {
        actor: String,
        user: String,
    },
    SetAdmin {
        actor: String,
        user: String,
        is_admin: bool,
    },
    Balance {
        user: String,
    },
    Profile {
        user: String,
    },
    History {
        user: String,
    },
    Available,
    Stats {
        actor: String,
    },
    Audit,
}

fn default_true() -> bool {
    true
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::BootstrapAdmin { .. } => "bootstrap_admin",
            Command::Register { .. } => "register",
            Command::Login { .. } => "login",
            Command::Logout { .. } => "logout",
            Command::Grant { .. } => "grant",
            Command::Correct { .. } => "correct",
            Command::CreateItem { .. } => "create_item",
            Command::UpdateItem { .. } => "update_item",
            Command::WithdrawItem { .. } => "withdraw_item",
            Command::Approve { .. } => "approve",
            Command::Reject { .. } => "reject",
            Command::Feature { .. } => "feature",
            Command::RequestSwap { .. } => "request_swap",
            Command::Respond { .. } => "respond",
            Command::Cancel { .. } => "cancel",
            Command::Settle { .. } => "settle",
            Command::Redeem { .. } => "redeem",
            Command::Ban { .. } => "ban",
            Command::Unban { .. } => "unban",
            Command::SetAdmin { .. } => "set_admin",
            Command::Balance { .. } => "balance",
            Command::Profile { .. } => "profile",
            Command::History { .. } => "history",
            Command::Available => "available",
            Command::Stats { .. } => "stats",
            Command::Audit => "audit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub status: u16,
    pub retryable: bool,
    pub message: String,
}

impl From<&ExchangeError> for ErrorBody {
    fn from(e: &ExchangeError) -> Self {
        Self {
            code: e.code(),
            status: e.http_status(),
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

/// One output line per script line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub line: usize,
    pub op: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

pub struct Replay {
    exchange: ExchangeCoordinator,
    identity: SessionRegistry,
    users: FxHashMap<String, UserId>,
    sessions: FxHashMap<String, SessionToken>,
    items: FxHashMap<String, ItemId>,
    swaps: FxHashMap<String, SwapId>,
}

impl Replay {
    pub fn new(exchange: ExchangeCoordinator, identity: SessionRegistry) -> Self {
        Self {
            exchange,
            identity,
            users: FxHashMap::default(),
            sessions: FxHashMap::default(),
            items: FxHashMap::default(),
            swaps: FxHashMap::default(),
        }
    }

    pub fn exchange(&self) -> &ExchangeCoordinator {
        &self.exchange
    }

    /// Run a whole script; blank lines and `#` comments are skipped
    ///
    /// Business failures are reported per line. A line that is not a valid
    /// command aborts the run.
    pub async fn run_script(&mut self, script: &str) -> anyhow::Result<Vec<Outcome>> {
        let mut outcomes = Vec::new();
        for (idx, raw) in script.lines().enumerate() {
            let line = idx + 1;
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            let command: Command = serde_json::from_str(raw)
                .with_context(|| format!("line {}: invalid command", line))?;
            outcomes.push(self.run_line(line, command).await);
        }
        info!(commands = outcomes.len(), "Script replayed");
        Ok(outcomes)
    }

    pub async fn run_line(&mut self, line: usize, command: Command) -> Outcome {
        let op = command.name();
        debug!(line, op, "Applying command");
        match self.apply(command).await {
            Ok(result) => Outcome {
                line,
                op,
                ok: true,
                result: Some(result),
                error: None,
            },
            Err(e) => Outcome {
                line,
                op,
                ok: false,
                result: None,
                error: Some(ErrorBody::from(&e)),
            },
        }
    }

    pub async fn apply(&mut self, command: Command) -> Result<Value, ExchangeError> {
        match command {
            Command::BootstrapAdmin {
                alias,
                display_name,
            } => {
                let name = display_name.unwrap_or_else(|| alias.clone());
                let user = self
                    .exchange
                    .bootstrap_admin(&name, &credential_for(&alias))
                    .await?;
                self.enroll(alias, &user)?;
                Ok(json(&user))
            }
            Command::Register {
                alias,
                display_name,
            } => {
                let name = display_name.unwrap_or_else(|| alias.clone());
                let user = self
                    .exchange
                    .register_user(&name, &credential_for(&alias))
                    .await?;
                self.enroll(alias, &user)?;
                Ok(json(&user))
            }
            Command::Login { user } => {
                let id = self.user_id(&user)?;
                let record = self.exchange.user(id).await?;
                let token = self.identity.issue(&record)?;
                self.sessions.insert(user, token);
                Ok(json(&record))
            }
            Command::Logout { user } => {
                let revoked = self
                    .sessions
                    .remove(&user)
                    .is_some_and(|token| self.identity.revoke(&token));
                Ok(Value::Bool(revoked))
            }
            Command::Grant { actor, to, amount } => {
                let actor = self.actor(&actor).await?;
                let to = self.user_id(&to)?;
                Ok(json(&self.exchange.grant_points(&actor, to, amount).await?))
            }
            Command::Correct {
                actor,
                from,
                to,
                amount,
            } => {
                let actor = self.actor(&actor).await?;
                let from = self.user_id(&from)?;
                let to = self.user_id(&to)?;
                Ok(json(
                    &self.exchange.correct_points(&actor, from, to, amount).await?,
                ))
            }
            Command::CreateItem {
                actor,
                alias,
                draft,
            } => {
                let actor = self.actor(&actor).await?;
                let item = self.exchange.create_item(&actor, draft).await?;
                self.items.insert(alias, item.id);
                Ok(json(&item))
            }
            Command::UpdateItem { actor, item, patch } => {
                let actor = self.actor(&actor).await?;
                let item = self.item_id(&item)?;
                Ok(json(&self.exchange.update_item(&actor, item, patch).await?))
            }
            Command::WithdrawItem { actor, item } => {
                let actor = self.actor(&actor).await?;
                let item = self.item_id(&item)?;
                Ok(json(&self.exchange.withdraw_item(&actor, item).await?))
            }
            Command::Approve { actor, item } => {
                let actor = self.actor(&actor).await?;
                let item = self.item_id(&item)?;
                Ok(json(&self.exchange.approve_item(&actor, item).await?))
            }
            Command::Reject { actor, item } => {
                let actor = self.actor(&actor).await?;
                let item = self.item_id(&item)?;
                Ok(json(&self.exchange.reject_item(&actor, item).await?))
            }
            Command::Feature {
                actor,
                item,
                featured,
            } => {
                let actor = self.actor(&actor).await?;
                let item = self.item_id(&item)?;
                Ok(json(
                    &self.exchange.set_featured(&actor, item, featured).await?,
                ))
            }
            Command::RequestSwap {
                actor,
                item,
                alias,
                message,
            } => {
                let actor = self.actor(&actor).await?;
                let item = self.item_id(&item)?;
                let swap = self
                    .exchange
                    .create_swap_request(&actor, item, &message)
                    .await?;
                self.swaps.insert(alias, swap.id);
                Ok(json(&swap))
            }
            Command::Respond {
                actor,
                swap,
                accept,
            } => {
                let actor = self.actor(&actor).await?;
                let swap = self.swap_id(&swap)?;
                Ok(json(
                    &self.exchange.respond_to_swap(&actor, swap, accept).await?,
                ))
            }
            Command::Cancel { actor, swap } => {
                let actor = self.actor(&actor).await?;
                let swap = self.swap_id(&swap)?;
                Ok(json(&self.exchange.cancel_swap(&actor, swap).await?))
            }
            Command::Settle { actor, swap } => {
                let actor = self.actor(&actor).await?;
                let swap = self.swap_id(&swap)?;
                Ok(json(
                    &self.exchange.accept_swap_and_settle(&actor, swap).await?,
                ))
            }
            Command::Redeem { actor, item } => {
                let actor = self.actor(&actor).await?;
                let item = self.item_id(&item)?;
                Ok(json(&self.exchange.redeem_with_points(&actor, item).await?))
            }
            Command::Ban { actor, user } => {
                let actor = self.actor(&actor).await?;
                let user = self.user_id(&user)?;
                Ok(json(&self.exchange.ban_user(&actor, user).await?))
            }
            Command::Unban { actor, user } => {
                let actor = self.actor(&actor).await?;
                let user = self.user_id(&user)?;
                Ok(json(&self.exchange.unban_user(&actor, user).await?))
            }
            Command::SetAdmin {
                actor,
                user,
                is_admin,
            } => {
                let actor = self.actor(&actor).await?;
                let target = self.user_id(&user)?;
                let updated = self.exchange.set_admin(&actor, target, is_admin).await?;
                // Sessions carry the role; force a fresh login
                self.identity.revoke_user(target);
                self.sessions.remove(&user);
                Ok(json(&updated))
            }
            Command::Balance { user } => {
                let id = self.user_id(&user)?;
                Ok(json(&self.exchange.balance_of(id).await?))
            }
            Command::Profile { user } => {
                let id = self.user_id(&user)?;
                Ok(json(&self.exchange.user_profile(id).await?))
            }
            Command::History { user } => {
                let id = self.user_id(&user)?;
                Ok(json(&self.exchange.ledger_history(id).await?))
            }
            Command::Available => Ok(json(&self.exchange.available_items().await?)),
            Command::Stats { actor } => {
                let actor = self.actor(&actor).await?;
                Ok(json(&self.exchange.platform_stats(&actor).await?))
            }
            Command::Audit => Ok(json(&self.exchange.audit().await?)),
        }
    }

    fn enroll(&mut self, alias: String, user: &User) -> Result<(), ExchangeError> {
        let token = self.identity.issue(user)?;
        self.users.insert(alias.clone(), user.id());
        self.sessions.insert(alias, token);
        Ok(())
    }

    async fn actor(&self, alias: &str) -> Result<Actor, ExchangeError> {
        let token = self
            .sessions
            .get(alias)
            .ok_or(ExchangeError::Unauthorized)?;
        self.identity.resolve(token).await
    }

    fn user_id(&self, alias: &str) -> Result<UserId, ExchangeError> {
        lookup(&self.users, "user", alias)
    }

    fn item_id(&self, alias: &str) -> Result<ItemId, ExchangeError> {
        lookup(&self.items, "item", alias)
    }

    fn swap_id(&self, alias: &str) -> Result<SwapId, ExchangeError> {
        lookup(&self.swaps, "swap request", alias)
    }
}

fn lookup<T: Copy>(
    aliases: &FxHashMap<String, T>,
    kind: &'static str,
    alias: &str,
) -> Result<T, ExchangeError> {
    aliases
        .get(alias)
        .copied()
        .ok_or_else(|| ExchangeError::not_found(kind, alias))
}

/// Scripts never carry secrets; the credential reference is derived from the alias
fn credential_for(alias: &str) -> String {
    format!("replay:{}", alias)
}

fn json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
