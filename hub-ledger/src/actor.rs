//! Single-writer access to a simulation
//!
//! The [`System`] is moved into one Tokio task. Callers hold a cloneable
//! [`SimulationHandle`] and talk to it over a bounded mailbox, so every
//! operation is applied in one total order against one logical clock.
//!
//! ```text
//!   SimulationHandle (Clone) ──┐
//!   SimulationHandle (Clone) ──┼── mpsc (bounded) ──► SimulationActor ──► System
//!   SimulationHandle (Clone) ──┘                           │
//!                 ▲                                        │
//!                 └─────────────── oneshot reply ──────────┘
//! ```

use crate::invariants::InvariantReport;
use crate::spoke::RepayOutcome;
use crate::system::System;
use crate::types::{Debt, UserId};
use crate::{Error, Result};
use alloy_primitives::U256;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the simulation actor
#[derive(Debug)]
pub enum SimulationMessage {
    /// Supply for a user
    Supply {
        user: UserId,
        amount: U256,
        response: oneshot::Sender<Result<U256>>,
    },

    /// Withdraw for a user
    Withdraw {
        user: UserId,
        amount: U256,
        response: oneshot::Sender<Result<U256>>,
    },

    /// Borrow for a user
    Borrow {
        user: UserId,
        amount: U256,
        response: oneshot::Sender<Result<U256>>,
    },

    /// Repay for a user
    Repay {
        user: UserId,
        amount: U256,
        response: oneshot::Sender<Result<RepayOutcome>>,
    },

    /// Re-roll a user's risk premium
    UpdateRiskPremium {
        user: UserId,
        response: oneshot::Sender<Result<()>>,
    },

    /// Read a user's debt
    GetDebt {
        user: UserId,
        response: oneshot::Sender<Result<Debt>>,
    },

    /// Read a user's supplied balance
    GetSuppliedBalance {
        user: UserId,
        response: oneshot::Sender<Result<U256>>,
    },

    /// Preview shares for a supply
    PreviewSupplyShares {
        amount: U256,
        response: oneshot::Sender<Result<U256>>,
    },

    /// List user ids
    UserIds {
        response: oneshot::Sender<Vec<UserId>>,
    },

    /// Read the logical clock
    Now {
        response: oneshot::Sender<u64>,
    },

    /// Advance the logical clock
    Skip {
        units: u64,
        response: oneshot::Sender<u64>,
    },

    /// Repay every user in full
    RepayAll {
        response: oneshot::Sender<Result<()>>,
    },

    /// Withdraw every user's supply
    WithdrawAll {
        response: oneshot::Sender<Result<()>>,
    },

    /// Run the invariant suite
    RunInvariants {
        response: oneshot::Sender<InvariantReport>,
    },

    /// Run the invariant suite if enabled; error on any failure
    CheckInvariants {
        response: oneshot::Sender<Result<()>>,
    },

    /// Render metrics
    Metrics {
        response: oneshot::Sender<String>,
    },

    /// Stop the actor and hand the system back
    Shutdown {
        response: oneshot::Sender<System>,
    },
}

/// Actor that owns the system
#[derive(Debug)]
pub struct SimulationActor {
    /// The simulated ledger
    system: System,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<SimulationMessage>,
}

impl SimulationActor {
    /// Create new actor
    pub fn new(system: System, mailbox: mpsc::Receiver<SimulationMessage>) -> Self {
        Self { system, mailbox }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            if let SimulationMessage::Shutdown { response } = msg {
                tracing::debug!("Simulation actor shutting down");
                let _ = response.send(self.system);
                return;
            }
            self.handle_message(msg);
        }
        tracing::debug!("Simulation mailbox closed");
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: SimulationMessage) {
        let system = &mut self.system;
        match msg {
            SimulationMessage::Supply { user, amount, response } => {
                let _ = response.send(system.supply(user, amount));
            }

            SimulationMessage::Withdraw { user, amount, response } => {
                let _ = response.send(system.withdraw(user, amount));
            }

            SimulationMessage::Borrow { user, amount, response } => {
                let _ = response.send(system.borrow(user, amount));
            }

            SimulationMessage::Repay { user, amount, response } => {
                let _ = response.send(system.repay(user, amount));
            }

            SimulationMessage::UpdateRiskPremium { user, response } => {
                let _ = response.send(system.update_risk_premium(user));
            }

            SimulationMessage::GetDebt { user, response } => {
                let _ = response.send(system.get_debt(user));
            }

            SimulationMessage::GetSuppliedBalance { user, response } => {
                let _ = response.send(system.get_supplied_balance(user));
            }

            SimulationMessage::PreviewSupplyShares { amount, response } => {
                let _ = response.send(system.preview_supply_shares(amount));
            }

            SimulationMessage::UserIds { response } => {
                let _ = response.send(system.user_ids());
            }

            SimulationMessage::Now { response } => {
                let _ = response.send(system.now());
            }

            SimulationMessage::Skip { units, response } => {
                system.skip(units);
                let _ = response.send(system.now());
            }

            SimulationMessage::RepayAll { response } => {
                let _ = response.send(system.repay_all());
            }

            SimulationMessage::WithdrawAll { response } => {
                let _ = response.send(system.withdraw_all());
            }

            SimulationMessage::RunInvariants { response } => {
                let _ = response.send(system.run_invariants());
            }

            SimulationMessage::CheckInvariants { response } => {
                let _ = response.send(system.check_invariants());
            }

            SimulationMessage::Metrics { response } => {
                let _ = response.send(system.metrics().render());
            }

            SimulationMessage::Shutdown { .. } => {
                // Handled in main loop
            }
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Debug, Clone)]
pub struct SimulationHandle {
    sender: mpsc::Sender<SimulationMessage>,
}

impl SimulationHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<SimulationMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> SimulationMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Supply for a user
    pub async fn supply(&self, user: UserId, amount: U256) -> Result<U256> {
        self.request(|response| SimulationMessage::Supply { user, amount, response })
            .await?
    }

    /// Withdraw for a user
    pub async fn withdraw(&self, user: UserId, amount: U256) -> Result<U256> {
        self.request(|response| SimulationMessage::Withdraw { user, amount, response })
            .await?
    }

    /// Borrow for a user
    pub async fn borrow(&self, user: UserId, amount: U256) -> Result<U256> {
        self.request(|response| SimulationMessage::Borrow { user, amount, response })
            .await?
    }

    /// Repay for a user
    pub async fn repay(&self, user: UserId, amount: U256) -> Result<RepayOutcome> {
        self.request(|response| SimulationMessage::Repay { user, amount, response })
            .await?
    }

    /// Re-roll a user's risk premium
    pub async fn update_risk_premium(&self, user: UserId) -> Result<()> {
        self.request(|response| SimulationMessage::UpdateRiskPremium { user, response })
            .await?
    }

    /// Drawn and premium debt of a user
    pub async fn get_debt(&self, user: UserId) -> Result<Debt> {
        self.request(|response| SimulationMessage::GetDebt { user, response })
            .await?
    }

    /// Total debt of a user
    pub async fn get_total_debt(&self, user: UserId) -> Result<U256> {
        self.get_debt(user).await?.total()
    }

    /// Supplied balance of a user
    pub async fn get_supplied_balance(&self, user: UserId) -> Result<U256> {
        self.request(|response| SimulationMessage::GetSuppliedBalance { user, response })
            .await?
    }

    /// Shares a supply would mint
    pub async fn preview_supply_shares(&self, amount: U256) -> Result<U256> {
        self.request(|response| SimulationMessage::PreviewSupplyShares { amount, response })
            .await?
    }

    /// All user ids
    pub async fn user_ids(&self) -> Result<Vec<UserId>> {
        self.request(|response| SimulationMessage::UserIds { response })
            .await
    }

    /// Current logical time
    pub async fn now(&self) -> Result<u64> {
        self.request(|response| SimulationMessage::Now { response })
            .await
    }

    /// Advance the clock; returns the new time
    pub async fn skip(&self, units: u64) -> Result<u64> {
        self.request(|response| SimulationMessage::Skip { units, response })
            .await
    }

    /// Repay every user in full
    pub async fn repay_all(&self) -> Result<()> {
        self.request(|response| SimulationMessage::RepayAll { response })
            .await?
    }

    /// Withdraw every user's supply
    pub async fn withdraw_all(&self) -> Result<()> {
        self.request(|response| SimulationMessage::WithdrawAll { response })
            .await?
    }

    /// Run the invariant suite
    pub async fn run_invariants(&self) -> Result<InvariantReport> {
        self.request(|response| SimulationMessage::RunInvariants { response })
            .await
    }

    /// Run the invariant suite unless disabled by configuration
    pub async fn check_invariants(&self) -> Result<()> {
        self.request(|response| SimulationMessage::CheckInvariants { response })
            .await?
    }

    /// Metrics in the Prometheus text format
    pub async fn metrics(&self) -> Result<String> {
        self.request(|response| SimulationMessage::Metrics { response })
            .await
    }

    /// Shutdown actor and take back the system
    pub async fn shutdown(&self) -> Result<System> {
        self.request(|response| SimulationMessage::Shutdown { response })
            .await
    }
}

/// Spawn the simulation actor
pub fn spawn_simulation_actor(system: System) -> SimulationHandle {
    let (tx, rx) = mpsc::channel(1000); // Bounded channel for backpressure
    let actor = SimulationActor::new(system, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    SimulationHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InvariantConfig;
    use crate::context::SimulationContext;
    use crate::math::{MAX_UINT, RAY};
    use crate::sampler::{RoundRobinAssigner, ScriptedRates};

    fn system(users: usize) -> System {
        let rates = ScriptedRates::new(vec![RAY, RAY * U256::from(2)], vec![U256::from(1_000)]);
        System::with_context(
            SimulationContext::new(Box::new(rates)),
            1,
            users,
            &mut RoundRobinAssigner::default(),
            &InvariantConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let handle = spawn_simulation_actor(system(2));
        let system = handle.shutdown().await.unwrap();
        assert_eq!(system.users().len(), 2);
    }

    #[tokio::test]
    async fn test_actor_operations() {
        let handle = spawn_simulation_actor(system(1));
        let alice = UserId(1);

        handle.supply(alice, U256::from(10_000)).await.unwrap();
        handle.borrow(alice, U256::from(1_000)).await.unwrap();
        assert_eq!(handle.skip(1).await.unwrap(), 2);

        // index doubled, 10% premium on 1000 shares
        assert_eq!(
            handle.get_total_debt(alice).await.unwrap(),
            U256::from(2_100)
        );

        let outcome = handle.repay(alice, MAX_UINT).await.unwrap();
        assert_eq!(outcome.premium_restored, U256::from(100));
        assert!(handle.get_total_debt(alice).await.unwrap().is_zero());
        assert!(handle.run_invariants().await.unwrap().is_clean());

        let metrics = handle.metrics().await.unwrap();
        assert!(metrics.contains("hub_ledger_operations_total 3"));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handles_share_one_order() {
        let handle = spawn_simulation_actor(system(4));
        let mut tasks = Vec::new();
        for id in 1..=4u64 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.supply(UserId(id), U256::from(1_000 * id)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let system = handle.shutdown().await.unwrap();
        assert_eq!(system.hub().liquidity, U256::from(10_000));
        assert!(system.users().values().all(|u| !u.account.supplied_shares.is_zero()));
    }

    #[tokio::test]
    async fn test_errors_cross_the_mailbox() {
        let handle = spawn_simulation_actor(system(1));
        let err = handle.borrow(UserId(1), U256::from(1)).await.unwrap_err();
        assert!(matches!(err, Error::Underflow { .. }));
        assert!(matches!(
            handle.supply(UserId(7), U256::from(1)).await,
            Err(Error::UnknownUser(UserId(7)))
        ));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_mailbox_is_concurrency_error() {
        let handle = spawn_simulation_actor(system(1));
        handle.shutdown().await.unwrap();
        let result = handle.user_ids().await;
        assert!(matches!(result, Err(Error::Concurrency(_))));
    }
}
