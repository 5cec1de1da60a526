use std::time::Duration;

use anyhow::{Context, Result};
use thirtyfour::prelude::*;
use thirtyfour::ChromiumLikeCapabilities;

const POLL: Duration = Duration::from_millis(250);

const CHROME_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--window-size=1920,1080",
];

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Address of a running chromedriver.
    pub webdriver_url: String,
    pub headless: bool,
    /// Upper bound for any single element wait.
    pub wait: Duration,
    /// Pause after navigation or clicks that trigger a page reload.
    pub settle: Duration,
}

/// Open a fresh Chrome session. One session is used per keyword run.
pub async fn start(settings: &BrowserSettings) -> Result<WebDriver> {
    let mut caps = DesiredCapabilities::chrome();
    for arg in CHROME_ARGS {
        caps.add_arg(*arg)?;
    }
    if settings.headless {
        caps.add_arg("--headless")?;
    }
    let driver = WebDriver::new(&settings.webdriver_url, caps)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to WebDriver at {}. Is chromedriver running?",
                settings.webdriver_url
            )
        })?;
    Ok(driver)
}

pub async fn settle(settings: &BrowserSettings) {
    tokio::time::sleep(settings.settle).await;
}

/// Wait until `by` matches, then return the first match.
pub async fn wait_for(driver: &WebDriver, by: By, wait: Duration) -> WebDriverResult<WebElement> {
    driver.query(by).wait(wait, POLL).first().await
}

/// Wait until `by` matches at least once, then return every match.
pub async fn wait_for_all(
    driver: &WebDriver,
    by: By,
    wait: Duration,
) -> WebDriverResult<Vec<WebElement>> {
    driver.query(by.clone()).wait(wait, POLL).first().await?;
    driver.find_all(by).await
}

pub async fn first_within(element: &WebElement, by: By) -> WebDriverResult<Option<WebElement>> {
    Ok(element.find_all(by).await?.into_iter().next())
}

/// Resolved `href` of a link, if it has one.
pub async fn href(element: &WebElement) -> WebDriverResult<Option<String>> {
    Ok(element.prop("href").await?.filter(|h| !h.is_empty()))
}

/// A pagination control is usable when it is not marked disabled and does
/// not point at a `javascript:;` placeholder.
pub async fn is_active_link(element: &WebElement) -> WebDriverResult<bool> {
    let class = element.class_name().await?.unwrap_or_default();
    let href = element.attr("href").await?.unwrap_or_default();
    Ok(!class.contains("disabled") && href != "javascript:;")
}

/// Clear `element`, type `text` and submit with Enter.
pub async fn type_and_submit(element: &WebElement, text: &str) -> WebDriverResult<()> {
    element.clear().await?;
    element.send_keys(text).await?;
    element.send_keys(Key::Enter + "").await?;
    Ok(())
}
