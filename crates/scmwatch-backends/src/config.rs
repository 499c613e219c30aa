//! Tagged backend configuration and the connector factory.
//!
//! ```toml
//! type = "svn"
//! trunk_url = "https://svn.example.org/repo/trunk"
//! retry = { attempts = 3, delay_secs = 10 }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scmwatch_core::{
    HistoryParser, Modification, ProcessExecutor, Result, SessionRegistries, SourceControl,
};

use crate::alienbrain::{AlienbrainConfig, AlienbrainConnector, AlienbrainHistoryParser};
use crate::clearcase::{ClearCaseConfig, ClearCaseConnector, ClearCaseHistoryParser};
use crate::cvs::{CvsConfig, CvsConnector, CvsHistoryParser};
use crate::ftp::{FtpConfig, FtpConnector, FtpListingParser};
use crate::mks::{self, MksConfig, MksConnector, MksHistoryParser};
use crate::pvcs::{PvcsConfig, PvcsConnector, PvcsHistoryParser};
use crate::settings::ConnectorSettings;
use crate::starteam::{StarTeamConfig, StarTeamConnector, StarTeamHistoryParser};
use crate::svn::{SvnConfig, SvnConnector, SvnHistoryParser};
use crate::vault::{VaultConfig, VaultConnector, VaultHistoryParser};
use crate::vss::{VssConfig, VssConnector, VssHistoryParser};

/// One configured source-control block, selected by its `type` key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Cvs(CvsConfig),
    ClearCase(ClearCaseConfig),
    Svn(SvnConfig),
    Vss(VssConfig),
    StarTeam(StarTeamConfig),
    Pvcs(PvcsConfig),
    Mks(MksConfig),
    Vault(VaultConfig),
    Ftp(FtpConfig),
    Alienbrain(AlienbrainConfig),
}

impl BackendConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            BackendConfig::Cvs(_) => crate::cvs::BACKEND,
            BackendConfig::ClearCase(_) => crate::clearcase::BACKEND,
            BackendConfig::Svn(_) => crate::svn::BACKEND,
            BackendConfig::Vss(_) => crate::vss::BACKEND,
            BackendConfig::StarTeam(_) => crate::starteam::BACKEND,
            BackendConfig::Pvcs(_) => crate::pvcs::BACKEND,
            BackendConfig::Mks(_) => mks::BACKEND,
            BackendConfig::Vault(_) => crate::vault::BACKEND,
            BackendConfig::Ftp(_) => crate::ftp::BACKEND,
            BackendConfig::Alienbrain(_) => crate::alienbrain::BACKEND,
        }
    }

    pub fn settings(&self) -> &ConnectorSettings {
        match self {
            BackendConfig::Cvs(c) => &c.settings,
            BackendConfig::ClearCase(c) => &c.settings,
            BackendConfig::Svn(c) => &c.settings,
            BackendConfig::Vss(c) => &c.settings,
            BackendConfig::StarTeam(c) => &c.settings,
            BackendConfig::Pvcs(c) => &c.settings,
            BackendConfig::Mks(c) => &c.settings,
            BackendConfig::Vault(c) => &c.settings,
            BackendConfig::Ftp(c) => &c.settings,
            BackendConfig::Alienbrain(c) => &c.settings,
        }
    }

    /// Build the connector. Session-holding backends take their shared
    /// registry from `sessions`.
    pub fn build(
        &self,
        executor: Arc<dyn ProcessExecutor>,
        sessions: &SessionRegistries,
    ) -> Result<Box<dyn SourceControl>> {
        tracing::debug!(backend = self.backend_name(), "building connector");
        Ok(match self {
            BackendConfig::Cvs(c) => Box::new(CvsConnector::new(c.clone(), executor)?),
            BackendConfig::ClearCase(c) => Box::new(ClearCaseConnector::new(c.clone(), executor)?),
            BackendConfig::Svn(c) => Box::new(SvnConnector::new(c.clone(), executor)?),
            BackendConfig::Vss(c) => Box::new(VssConnector::new(c.clone(), executor)?),
            BackendConfig::StarTeam(c) => Box::new(StarTeamConnector::new(c.clone(), executor)?),
            BackendConfig::Pvcs(c) => Box::new(PvcsConnector::new(c.clone(), executor)?),
            BackendConfig::Mks(c) => Box::new(MksConnector::new(
                c.clone(),
                executor,
                sessions.for_backend(mks::BACKEND),
            )?),
            BackendConfig::Vault(c) => Box::new(VaultConnector::new(c.clone(), executor)?),
            BackendConfig::Ftp(c) => Box::new(FtpConnector::new(c.clone(), executor)?),
            BackendConfig::Alienbrain(c) => {
                Box::new(AlienbrainConnector::new(c.clone(), executor)?)
            }
        })
    }

    /// The parser this backend's connector uses, for saved client output.
    pub fn history_parser(&self) -> Box<dyn HistoryParser> {
        let policy = self.settings().record_policy;
        match self {
            BackendConfig::Cvs(_) => Box::new(CvsHistoryParser::new(policy)),
            BackendConfig::ClearCase(_) => Box::new(ClearCaseHistoryParser::new(policy)),
            BackendConfig::Svn(_) => Box::new(SvnHistoryParser::new(policy)),
            BackendConfig::Vss(c) => Box::new(VssHistoryParser::new(c.locale.clone(), policy)),
            BackendConfig::StarTeam(c) => {
                Box::new(StarTeamHistoryParser::new(c.date_format.clone(), policy))
            }
            BackendConfig::Pvcs(c) => Box::new(PvcsHistoryParser::new(c.date_format.clone(), policy)),
            BackendConfig::Mks(_) => Box::new(MksHistoryParser::new(policy)),
            BackendConfig::Vault(c) => {
                Box::new(VaultHistoryParser::new(c.date_format.clone(), policy))
            }
            BackendConfig::Ftp(_) => Box::new(FtpListingParser::new(policy)),
            BackendConfig::Alienbrain(_) => Box::new(AlienbrainHistoryParser::new(policy)),
        }
    }

    pub fn parse_history(
        &self,
        raw: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Modification>> {
        self.history_parser().parse(raw, from, to)
    }
}
