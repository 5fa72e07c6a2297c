//! Trade Map ポータルのURL・コントロールID・ページマーカー。
//!
//! サイト側の表現への依存はこのモジュールと設定・ダウンロード処理に閉じ込め、
//! リゾルバ・パーサ・集約・出力はIDを一切知らない。

pub const BASE_URL: &str = "https://www.trademap.org/Index.aspx";
pub const PRODUCT_URL: &str = "https://www.trademap.org/Product_SelCountry_MQ_TS.aspx";

/// キャプチャページに滞在している間、URLに含まれるマーカー
pub const CAPTCHA_URL_MARKER: &str = "stCaptcha.aspx";
/// キャプチャ入力が拒否されたときにページに現れる文言
pub const CAPTCHA_ERROR_TEXT: &str = "The characters you entered are not valid";
/// アカウントに選択した値への権限がないときのページマーカー
pub const RESTRICTION_MARKER: &str = "Div_PopupRestriction";
/// 認証情報が誤っているときのページ文言
pub const INVALID_LOGIN_MARKER: &str = "Invalid username or password";

pub const LOGIN_MENU: &str = "ctl00_MenuControl_marmenu_login";
pub const USERNAME_FIELD: &str = "Username";
pub const PASSWORD_FIELD: &str = "Password";
pub const LOGIN_SUBMIT: &str = "button[value='login']";

pub const PRODUCT_DROPDOWN: &str = "ctl00_NavigationControl_DropDownList_Product";
pub const COUNTRY_RADIO: &str = "ctl00_NavigationControl_RadioButton_Country";
pub const COUNTRY_DROPDOWN: &str = "ctl00_NavigationControl_DropDownList_Country";
pub const PARTNER_DROPDOWN: &str = "ctl00_NavigationControl_DropDownList_Partner";
pub const TRADE_TYPE_DROPDOWN: &str = "ctl00_NavigationControl_DropDownList_TradeType";
pub const OUTPUT_TYPE_DROPDOWN: &str = "ctl00_NavigationControl_DropDownList_OutputType";
pub const OUTPUT_OPTION_DROPDOWN: &str = "ctl00_NavigationControl_DropDownList_OutputOption";
pub const MIRROR_DIRECT_DROPDOWN: &str = "ctl00_NavigationControl_DropDownList_MirrorDirect";
pub const INDICATOR_DROPDOWN: &str = "ctl00_NavigationControl_DropDownList_TS_Indicator";

pub const NUM_TIME_PERIOD_DROPDOWN: &str =
    "ctl00_PageContent_GridViewPanelControl_DropDownList_NumTimePeriod";
pub const PAGE_SIZE_DROPDOWN: &str =
    "ctl00_PageContent_GridViewPanelControl_DropDownList_PageSize";

pub const EXPORT_TEXT_BUTTON: &str = "ctl00_PageContent_GridViewPanelControl_ImageButton_Text";
pub const PREVIOUS_BUTTON: &str =
    "ctl00_PageContent_GridViewPanelControl_ImageButton_Previous";

/// 「All products」を表す製品ドロップダウンの値
pub const ALL_PRODUCTS_VALUE: &str = "TOTAL";
