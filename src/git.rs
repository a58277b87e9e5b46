use std::path::{Path, PathBuf};

use git2::{BranchType, ErrorCode, Repository};

use crate::{clog_debug, Result};

pub struct GitOps {
    repo_path: PathBuf,
}

impl GitOps {
    pub fn new(repo_path: &Path) -> Result<Self> {
        clog_debug!("GitOps::new path={}", repo_path.display());
        let _ = Repository::discover(repo_path)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    /// Reference `branch` is compared against before pushing: its own
    /// remote-tracking ref when it was pushed before, otherwise the base
    /// branch (remote first, then local). `None` if neither exists.
    pub fn comparison_point(&self, branch: &str, base: &str) -> Result<Option<String>> {
        let repo = self.repo()?;
        let candidates = [
            format!("refs/remotes/origin/{}", branch),
            format!("refs/remotes/origin/{}", base),
            format!("refs/heads/{}", base),
        ];
        for name in candidates {
            match repo.find_reference(&name) {
                Ok(_) => return Ok(Some(name)),
                Err(e) if e.code() == ErrorCode::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Commits on `branch` that the comparison point does not have.
    pub fn commits_ahead(&self, branch: &str, base: &str) -> Result<usize> {
        let repo = self.repo()?;
        let local = repo
            .find_branch(branch, BranchType::Local)?
            .get()
            .peel_to_commit()?
            .id();

        let Some(point) = self.comparison_point(branch, base)? else {
            clog_debug!("no comparison point for {} against {}", branch, base);
            let mut walk = repo.revwalk()?;
            walk.push(local)?;
            return Ok(walk.count());
        };
        let upstream = repo.find_reference(&point)?.peel_to_commit()?.id();
        let (ahead, _behind) = repo.graph_ahead_behind(local, upstream)?;
        clog_debug!("{} is {} commits ahead of {}", branch, ahead, point);
        Ok(ahead)
    }
}
