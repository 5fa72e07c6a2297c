use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("ブラウザ初期化エラー: {0}")]
    BrowserInit(String),

    #[error("ナビゲーションエラー: {0}")]
    Navigation(String),

    #[error("要素が見つかりません: {0}")]
    ElementNotFound(String),

    #[error("ドライバ操作エラー: {0}")]
    Driver(String),

    #[error("ログインエラー: {0}")]
    Login(String),

    #[error("ログインまたはパスワードが正しくありません")]
    InvalidCredentials,

    #[error("キャプチャ入力の待機がタイムアウトしました（{0}秒）")]
    CaptchaTimeout(u64),

    #[error("パラメータ設定エラー [{step}]: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("アカウントにコード {0} へのアクセス権がありません")]
    AccessRestricted(String),

    #[error("タイムアウト: {0}")]
    Timeout(String),

    #[error("データ形式エラー: {0}")]
    DataFormat(String),

    #[error("保存対象のデータがありません: {0}")]
    NoData(String),

    #[error("設定エラー: {0}")]
    Config(String),

    #[error("ファイル操作エラー: {0}")]
    FileIo(#[from] std::io::Error),

    #[error("Excel出力エラー: {0}")]
    Excel(#[from] rust_xlsxwriter::XlsxError),

    #[error("停止が要求されました")]
    Stopped,
}

impl ScrapeError {
    /// 協調的キャンセルによる中断かどうか。
    /// 中断は失敗ではなく、各境界で通常のエラーと区別して扱う。
    pub fn is_stop(&self) -> bool {
        matches!(self, ScrapeError::Stopped)
    }
}
