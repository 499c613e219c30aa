//! scmwatch backends
//!
//! One module per version-control tool. Each holds a pure history parser
//! (client output in, [`Modification`](scmwatch_core::Modification)s out)
//! and a connector implementing
//! [`SourceControl`](scmwatch_core::SourceControl) on top of a
//! [`ProcessRunner`](scmwatch_core::ProcessRunner).
//!
//! | module | client | labels |
//! |---|---|---|
//! | [`cvs`] | `cvs rlog` | `tag` |
//! | [`clearcase`] | `cleartool lshist -fmt` | `mklbtype` + `mklabel` |
//! | [`svn`] | `svn log --xml -v` | `svn copy` to a tag URL |
//! | [`vss`] | `ss history` | `ss label` |
//! | [`starteam`] | `stcmd hist` | view label |
//! | [`pvcs`] | `pcli vlog` | version label, optionally differential |
//! | [`mks`] | `si viewsandbox` + `si memberinfo` | checkpoint |
//! | [`vault`] | `vault history` | label, optionally before the get |
//! | [`ftp`] | `curl` directory listings | none |
//! | [`alienbrain`] | `ab find` | `ab setlabel` |
//!
//! [`BackendConfig`] selects a backend from configuration and builds its
//! connector.

pub mod alienbrain;
pub mod clearcase;
pub mod config;
pub mod cvs;
pub mod ftp;
pub mod mks;
pub mod pvcs;
pub mod settings;
pub mod starteam;
pub mod svn;
pub mod vault;
pub mod vss;

pub use config::BackendConfig;
pub use settings::ConnectorSettings;

pub use alienbrain::{AlienbrainConfig, AlienbrainConnector};
pub use clearcase::{ClearCaseConfig, ClearCaseConnector};
pub use cvs::{CvsConfig, CvsConnector};
pub use ftp::{FtpConfig, FtpConnector};
pub use mks::{MksConfig, MksConnector};
pub use pvcs::{PvcsConfig, PvcsConnector};
pub use starteam::{StarTeamConfig, StarTeamConnector};
pub use svn::{SvnConfig, SvnConnector};
pub use vault::{VaultConfig, VaultConnector};
pub use vss::{VssConfig, VssConnector, VssLocale};
