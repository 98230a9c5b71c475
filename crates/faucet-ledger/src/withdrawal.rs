use {
    chrono::Utc,
    faucet_common::{
        types::{NewWithdrawal, Withdrawal, WithdrawalStatus},
        Error, Result,
    },
    faucet_store::LedgerStore,
    std::sync::Arc,
    tracing::{info, warn},
};

/// Outcome of one scheduled withdrawal pass
#[derive(Debug, Default)]
pub struct WithdrawalSweep {
    pub created: Vec<Withdrawal>,
    /// Users whose withdrawal failed twice, with the last error
    pub failed: Vec<(i64, Error)>,
}

/// Debits balances into pending withdrawals and moves withdrawals through the
/// disbursement pipeline on behalf of the external payout job.
pub struct WithdrawalSettlement {
    store: Arc<dyn LedgerStore>,
}

impl WithdrawalSettlement {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn request_withdrawal(&self, user_id: i64, address: &str, amount: i64) -> Result<Withdrawal> {
        if amount <= 0 {
            return Err(Error::InvalidAmount(amount));
        }
        if address.trim().is_empty() {
            return Err(Error::InvalidAddress(format!("empty address for user {}", user_id)));
        }

        let withdrawal = self
            .store
            .create_withdrawal(NewWithdrawal {
                user_id,
                address: address.to_string(),
                amount,
                now: Utc::now(),
            })
            .await?;

        info!(
            event = "withdrawal",
            user_id,
            amount,
            withdrawal_id = withdrawal.id,
            "Withdrawal requested"
        );
        Ok(withdrawal)
    }

    /// Advance a batch; either every id moves from `from` to `to` or none does.
    pub async fn advance_batch(
        &self,
        ids: &[i64],
        from: WithdrawalStatus,
        to: WithdrawalStatus,
        transaction_id: Option<&str>,
    ) -> Result<u64> {
        if !from.can_advance_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }

        match self
            .store
            .advance_withdrawals(ids, from, to, transaction_id, Utc::now())
            .await
        {
            Ok(advanced) => {
                info!("Advanced {} withdrawals from {} to {}", advanced, from, to);
                Ok(advanced)
            }
            Err(e) => {
                warn!("Withdrawal batch {} -> {} not applied: {}", from, to, e);
                Err(e)
            }
        }
    }

    /// Withdraw the full balance of every user holding at least `min_balance`,
    /// to the user's own address. Each failure is retried once.
    pub async fn create_scheduled_withdrawals(&self, min_balance: i64) -> Result<WithdrawalSweep> {
        let users = self.store.get_withdrawable_users(min_balance).await?;
        let mut sweep = WithdrawalSweep::default();

        for user in users {
            let first = self.request_withdrawal(user.id, &user.address, user.balance).await;
            let outcome = match first {
                Ok(withdrawal) => Ok(withdrawal),
                Err(e) => {
                    warn!("Scheduled withdrawal for user {} failed, retrying: {}", user.id, e);
                    self.request_withdrawal(user.id, &user.address, user.balance).await
                }
            };

            match outcome {
                Ok(withdrawal) => sweep.created.push(withdrawal),
                Err(e) => {
                    warn!("Scheduled withdrawal for user {} failed: {}", user.id, e);
                    sweep.failed.push((user.id, e));
                }
            }
        }

        info!(
            "Scheduled withdrawals: {} created, {} failed",
            sweep.created.len(),
            sweep.failed.len()
        );
        Ok(sweep)
    }
}
