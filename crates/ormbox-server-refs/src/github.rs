// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::time::Duration;

use ormbox_common_core::RefType;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{RefError, Result};

/// Resolved metadata for one ref, straight from the upstream API.
#[derive(Debug, Clone, PartialEq)]
pub struct RefMetadata {
	pub sha: String,
	pub title: String,
	pub author: String,
	pub state: String,
}

/// One hit from `search`; metadata only, nothing is materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefSearchResult {
	pub ref_type: RefType,
	pub id: String,
	pub title: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub state: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub author: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
	title: String,
	state: String,
	head: CommitPointer,
	user: UserRef,
}

#[derive(Debug, Deserialize)]
struct CommitPointer {
	sha: String,
}

#[derive(Debug, Deserialize)]
struct UserRef {
	login: String,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
	commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
	sha: String,
	#[serde(default)]
	author: Option<UserRef>,
}

#[derive(Debug, Deserialize)]
struct GitRefResponse {
	object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
	sha: String,
	#[serde(rename = "type")]
	object_type: String,
}

#[derive(Debug, Deserialize)]
struct SearchIssuesResponse {
	items: Vec<SearchIssueItem>,
}

#[derive(Debug, Deserialize)]
struct SearchIssueItem {
	number: u64,
	title: String,
	state: String,
	user: UserRef,
}

#[derive(Debug, Deserialize)]
struct BranchListItem {
	name: String,
}

#[derive(Debug, Deserialize)]
struct TagListItem {
	name: String,
}

/// Upstream metadata client for the mirrored repository.
pub struct GithubClient {
	http: reqwest::Client,
	api_base: String,
	repo: String,
	token: Option<String>,
}

impl GithubClient {
	pub fn new(
		api_base: impl Into<String>,
		repo: impl Into<String>,
		token: Option<String>,
		timeout: Duration,
	) -> Result<Self> {
		let http = reqwest::Client::builder().timeout(timeout).build()?;
		Ok(Self {
			http,
			api_base: api_base.into(),
			repo: repo.into(),
			token,
		})
	}

	fn request(&self, url: &str) -> reqwest::RequestBuilder {
		let mut req = self
			.http
			.get(url)
			.header("Accept", "application/vnd.github+json")
			.header("X-GitHub-Api-Version", "2022-11-28")
			.header("User-Agent", "ormbox");
		if let Some(token) = &self.token {
			req = req.header("Authorization", format!("Bearer {token}"));
		}
		req
	}

	async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
		let response = self.request(url).send().await?;

		match response.status().as_u16() {
			404 => Err(RefError::NotFound(what.to_string())),
			403 => Err(RefError::Fetch("GitHub API rate limit exceeded".to_string())),
			_ => {
				let response = response.error_for_status()?;
				Ok(response.json::<T>().await?)
			}
		}
	}

	/// Resolves a ref's target commit and display metadata. Annotated
	/// tags are dereferenced to the commit they point at.
	#[instrument(skip(self))]
	pub async fn ref_metadata(&self, ref_type: RefType, ref_id: &str) -> Result<RefMetadata> {
		match ref_type {
			RefType::Pr => {
				let url = format!("{}/repos/{}/pulls/{ref_id}", self.api_base, self.repo);
				let pr: PullResponse = self.get_json(&url, &format!("PR #{ref_id}")).await?;
				Ok(RefMetadata {
					sha: pr.head.sha,
					title: pr.title,
					author: pr.user.login,
					state: pr.state,
				})
			}
			RefType::Branch => {
				let url = format!("{}/repos/{}/branches/{ref_id}", self.api_base, self.repo);
				let branch: BranchResponse =
					self.get_json(&url, &format!("Branch '{ref_id}'")).await?;
				Ok(RefMetadata {
					sha: branch.commit.sha,
					title: ref_id.to_string(),
					author: branch
						.commit
						.author
						.map(|a| a.login)
						.unwrap_or_else(|| "unknown".to_string()),
					state: String::new(),
				})
			}
			RefType::Tag => {
				let url = format!(
					"{}/repos/{}/git/refs/tags/{ref_id}",
					self.api_base, self.repo
				);
				let tag_ref: GitRefResponse = self.get_json(&url, &format!("Tag '{ref_id}'")).await?;

				let sha = if tag_ref.object.object_type == "tag" {
					// Annotated tag: one more hop to the commit.
					let tag_url = format!(
						"{}/repos/{}/git/tags/{}",
						self.api_base, self.repo, tag_ref.object.sha
					);
					let tag_obj: GitRefResponse =
						self.get_json(&tag_url, &format!("Tag '{ref_id}'")).await?;
					tag_obj.object.sha
				} else {
					tag_ref.object.sha
				};

				Ok(RefMetadata {
					sha,
					title: ref_id.to_string(),
					author: String::new(),
					state: String::new(),
				})
			}
		}
	}

	/// Searches refs by free-text query; metadata only. An empty query
	/// returns nothing rather than the whole upstream namespace.
	#[instrument(skip(self))]
	pub async fn search(
		&self,
		ref_type: RefType,
		query: &str,
		limit: usize,
	) -> Result<Vec<RefSearchResult>> {
		let query = query.trim();
		if query.is_empty() {
			return Ok(Vec::new());
		}

		match ref_type {
			RefType::Pr => {
				let url = format!(
					"{}/search/issues?q=repo:{}+is:pr+{}&per_page={limit}",
					self.api_base, self.repo, query
				);
				let response: SearchIssuesResponse = self.get_json(&url, "PR search").await?;
				Ok(
					response
						.items
						.into_iter()
						.take(limit)
						.map(|item| RefSearchResult {
							ref_type: RefType::Pr,
							id: item.number.to_string(),
							title: item.title,
							state: Some(item.state),
							author: Some(item.user.login),
						})
						.collect(),
				)
			}
			RefType::Branch => {
				let url = format!(
					"{}/repos/{}/branches?per_page=100",
					self.api_base, self.repo
				);
				let branches: Vec<BranchListItem> = self.get_json(&url, "branch list").await?;
				Ok(filter_names(
					branches.into_iter().map(|b| b.name),
					query,
					limit,
					RefType::Branch,
				))
			}
			RefType::Tag => {
				let url = format!("{}/repos/{}/tags?per_page=100", self.api_base, self.repo);
				let tags: Vec<TagListItem> = self.get_json(&url, "tag list").await?;
				Ok(filter_names(
					tags.into_iter().map(|t| t.name),
					query,
					limit,
					RefType::Tag,
				))
			}
		}
	}
}

fn filter_names(
	names: impl Iterator<Item = String>,
	query: &str,
	limit: usize,
	ref_type: RefType,
) -> Vec<RefSearchResult> {
	let query = query.to_lowercase();
	let results: Vec<RefSearchResult> = names
		.filter(|name| name.to_lowercase().contains(&query))
		.take(limit)
		.map(|name| RefSearchResult {
			ref_type,
			id: name.clone(),
			title: name,
			state: None,
			author: None,
		})
		.collect();
	debug!(count = results.len(), "filtered ref names");
	results
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_filter_names_case_insensitive() {
		let names = vec!["main".to_string(), "stable/5.2.x".to_string()];
		let results = filter_names(names.into_iter(), "STABLE", 10, RefType::Branch);
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].id, "stable/5.2.x");
	}

	#[test]
	fn test_filter_names_respects_limit() {
		let names = (0..10).map(|i| format!("branch-{i}"));
		let results = filter_names(names, "branch", 3, RefType::Branch);
		assert_eq!(results.len(), 3);
	}

	#[test]
	fn test_annotated_tag_detection() {
		let annotated: GitRefResponse = serde_json::from_str(
			r#"{"object": {"sha": "deadbeef", "type": "tag"}}"#,
		)
		.unwrap();
		assert_eq!(annotated.object.object_type, "tag");

		let lightweight: GitRefResponse = serde_json::from_str(
			r#"{"object": {"sha": "deadbeef", "type": "commit"}}"#,
		)
		.unwrap();
		assert_eq!(lightweight.object.object_type, "commit");
	}

	#[test]
	fn test_pull_response_parsing() {
		let payload = r#"{
			"title": "Fixed #12345 -- Added async ORM support",
			"state": "open",
			"head": {"sha": "0123456789abcdef0123456789abcdef01234567"},
			"user": {"login": "contributor"}
		}"#;
		let pr: PullResponse = serde_json::from_str(payload).unwrap();
		assert_eq!(pr.state, "open");
		assert_eq!(pr.user.login, "contributor");
		assert!(pr.head.sha.starts_with("0123"));
	}

	#[test]
	fn test_branch_response_without_author() {
		let payload = r#"{"commit": {"sha": "abc123"}}"#;
		let branch: BranchResponse = serde_json::from_str(payload).unwrap();
		assert!(branch.commit.author.is_none());
	}

	#[tokio::test]
	async fn test_search_empty_query_is_empty() {
		let client = GithubClient::new(
			"https://api.github.invalid",
			"django/django",
			None,
			Duration::from_secs(1),
		)
		.unwrap();

		let results = client.search(RefType::Pr, "  ", 10).await.unwrap();
		assert!(results.is_empty());
	}
}
