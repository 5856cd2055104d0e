use super::{decode_row, AccountSource, PipelineStore};
use crate::{
    error::PipelineResult,
    model::{Account, AccountStatus},
    types::AccountNumber,
};
use rusqlite::{params, types::Type, Row};
use std::collections::HashMap;

impl PipelineStore {
    // ── Account ───────────────────────────────────────────────────

    /// Provision or refresh one account. The pipeline itself never calls
    /// this; it exists for seeding and tests.
    pub fn upsert_account(&self, account: &Account) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO account (account_number, name, status, current_balance)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account_number) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                current_balance = excluded.current_balance",
            params![
                account.account_number,
                account.name,
                account.status.as_str(),
                account.current_balance,
            ],
        )?;
        Ok(())
    }

    /// Accounts that do not decode are logged and left out; the rest of
    /// the reference data stays usable.
    fn query_accounts(&self, sql: &str) -> PipelineResult<Vec<Account>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| decode_row(row, 0, account_from_row))?;
        let mut accounts = Vec::new();
        for row in rows {
            match row? {
                Ok(account) => accounts.push(account),
                Err(bad) => log::warn!("Skipping undecodable account {}: {}", bad.id, bad.reason),
            }
        }
        Ok(accounts)
    }
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let raw_status: String = row.get(2)?;
    let status = AccountStatus::parse(&raw_status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown account status '{raw_status}'").into(),
        )
    })?;
    Ok(Account {
        account_number: row.get(0)?,
        name: row.get(1)?,
        status,
        current_balance: row.get(3)?,
    })
}

impl AccountSource for PipelineStore {
    fn opened_accounts(&self) -> PipelineResult<Vec<Account>> {
        self.query_accounts(
            "SELECT account_number, name, status, current_balance
             FROM account WHERE UPPER(status) = 'OPENED'
             ORDER BY account_number ASC",
        )
    }

    fn accounts_by_number(&self) -> PipelineResult<HashMap<AccountNumber, Account>> {
        let accounts = self.query_accounts(
            "SELECT account_number, name, status, current_balance
             FROM account ORDER BY account_number ASC",
        )?;
        Ok(accounts
            .into_iter()
            .map(|a| (a.account_number.clone(), a))
            .collect())
    }
}
