use common::error::AppError;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    #[serde(rename = "accountId")]
    pub account_id: String,
    #[serde(rename = "accountName", default)]
    pub account_name: String,
    #[serde(rename = "accountKey", default)]
    pub account_key: String,
    #[serde(rename = "isAllAccounts", default)]
    pub is_all_accounts: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AccountListing {
    pub aggregate: Vec<Account>,
    pub individual: Vec<Account>,
}

impl AccountListing {
    #[must_use]
    pub fn find(&self, id_or_name: &str) -> Option<&Account> {
        self.individual
            .iter()
            .chain(self.aggregate.iter())
            .find(|a| a.account_id == id_or_name || a.account_name == id_or_name)
    }
}

#[derive(Debug, Deserialize)]
struct PlainSubUsersResponse {
    accounts: Vec<Account>,
}

fn partition(accounts: Vec<Account>) -> AccountListing {
    let mut listing = AccountListing::default();
    for account in accounts {
        if account.is_all_accounts {
            listing.aggregate.push(account);
        } else {
            listing.individual.push(account);
        }
    }
    listing
}

/// Tries `/v1/users/plain-sub-users` first; on any non-200 response falls
/// back to `/v1/user-management/accounts` (a flat list).
pub async fn list_accounts(
    client: &reqwest::Client,
    base_url: &str,
    headers: reqwest::header::HeaderMap,
) -> Result<AccountListing, AppError> {
    let primary = client
        .get(format!("{base_url}/v1/users/plain-sub-users"))
        .headers(headers.clone())
        .send()
        .await;

    if let Ok(response) = primary {
        if response.status().is_success() {
            if let Ok(parsed) = response.json::<PlainSubUsersResponse>().await {
                return Ok(partition(parsed.accounts));
            }
        }
    }

    let fallback = client
        .get(format!("{base_url}/v1/user-management/accounts"))
        .headers(headers)
        .send()
        .await?;

    if !fallback.status().is_success() {
        return Err(AppError::UpstreamFatal(format!(
            "account listing failed with status {}",
            fallback.status()
        )));
    }

    let accounts: Vec<Account> = fallback.json().await?;
    Ok(partition(accounts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, aggregate: bool) -> Account {
        Account {
            account_id: id.to_string(),
            account_name: format!("name-{id}"),
            account_key: format!("key-{id}"),
            is_all_accounts: aggregate,
        }
    }

    #[test]
    fn partitions_by_is_all_accounts() {
        let listing = partition(vec![account("1", true), account("2", false)]);
        assert_eq!(listing.aggregate.len(), 1);
        assert_eq!(listing.individual.len(), 1);
    }

    #[test]
    fn find_matches_by_id_or_name() {
        let listing = partition(vec![account("1", false)]);
        assert!(listing.find("1").is_some());
        assert!(listing.find("name-1").is_some());
        assert!(listing.find("nope").is_none());
    }
}
