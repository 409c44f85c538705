//! Supervisor - サービス子プロセスの起動・監視・再起動
//!
//! # 構成
//! - **launch**: 実行言語と拡張子からコマンドラインを組み立てる
//! - **port**: ループバック上の空きポートをランダムに探す
//! - **init_timer**: 起動直後のエラーを許容する猶予期間
//! - **process**: 状態機械 {NotStarted, Starting, Ready, Crashed, Restarting, Stopped}
//!
//! 状態は `watch` チャネルで公開し、書き込みは supervisor だけが行う。

pub mod init_timer;
pub mod launch;
pub mod port;
pub mod process;

pub use self::init_timer::InitTimer;
pub use self::launch::{LaunchError, LaunchPlan};
pub use self::process::{ServiceState, ServiceSupervisor};
