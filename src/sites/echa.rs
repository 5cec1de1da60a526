use anyhow::{bail, Result};
use thirtyfour::components::SelectElement;
use thirtyfour::prelude::*;
use tracing::{info, warn};

use super::browser::{self, href, is_active_link, type_and_submit};
use super::{looks_like_document, normalize_date, ContentKind, KeyAllocator, RawRecord, WalkContext};

const SEARCH_FIELD: &str = "SimpleSearchText";
const UPDATED_FROM: &str = "//input[contains(@id, '_echasearch_WAR_echaportlet_updatedFrom')]";
const PICKER_YEAR: &str = "//select[contains(@class, 'ui-datepicker-year')]";
const PICKER_MONTH: &str = "//select[contains(@class, 'ui-datepicker-month')]";
const SORT_SELECT: &str = "//select[contains(@id, '_echasearch_WAR_echaportlet_sortingType')]";
const SORT_BY_MODIFIED: &str = "modified";
const RESULT_LINKS: &str = "//div[contains(@class, 'search-result-title')]//a[@href]";
const RESULT_DATES: &str =
    "//div[contains(@class, 'search-result-title')]//a[@href]/../../following-sibling::td";
const RESULT_BODIES: &str = "//div[contains(@class, 'search-result-content')]";
const NEXT_PAGE: &str = "//a[contains(text(), 'Next')]";

/// Lower bound of the "updated from" filter: (year, month, day).
const UPDATED_SINCE: (u32, u32, u32) = (2012, 8, 9);

/// Simple search restricted by update date, sorted by last modification.
/// Title links, date cells and result bodies are read as parallel columns.
pub(super) async fn walk(cx: &WalkContext<'_>, out: &mut Vec<RawRecord>) -> Result<()> {
    let driver = cx.driver;
    driver.goto(cx.base_url).await?;
    browser::settle(cx.browser).await;

    info!("Retrieving URLs for keyword: {}", cx.keyword);
    let field = browser::wait_for(driver, By::ClassName(SEARCH_FIELD), cx.browser.wait).await?;
    type_and_submit(&field, cx.keyword).await?;
    browser::settle(cx.browser).await;

    select_updated_since(cx).await?;
    sort_by_modified(cx).await?;

    let mut keys = KeyAllocator::default();
    let mut page = 1u32;
    loop {
        info!("Processing page number: {}", page);
        let wait = cx.browser.wait;
        let links = browser::wait_for_all(driver, By::XPath(RESULT_LINKS), wait).await?;
        let dates = browser::wait_for_all(driver, By::XPath(RESULT_DATES), wait).await?;
        let bodies = browser::wait_for_all(driver, By::XPath(RESULT_BODIES), wait).await?;

        for ((link, date), body) in links.iter().zip(&dates).zip(&bodies) {
            if let Err(e) = read_result(cx, link, date, body, &mut keys, out).await {
                warn!("Skipping result on page {}: {}", page, e);
            }
        }

        if !cx.limit.allows_next(page) {
            break;
        }
        let Some(next) = driver.find_all(By::XPath(NEXT_PAGE)).await?.into_iter().next() else {
            break;
        };
        if !is_active_link(&next).await? {
            break;
        }
        next.click().await?;
        browser::settle(cx.browser).await;
        page += 1;
    }
    Ok(())
}

async fn select_updated_since(cx: &WalkContext<'_>) -> WebDriverResult<()> {
    let (year, month, day) = UPDATED_SINCE;
    info!("Selecting date: {}-{}-{}", year, month, day);
    let driver = cx.driver;

    browser::wait_for(driver, By::XPath(UPDATED_FROM), cx.browser.wait)
        .await?
        .click()
        .await?;

    let year_select = browser::wait_for(driver, By::XPath(PICKER_YEAR), cx.browser.wait).await?;
    SelectElement::new(&year_select)
        .await?
        .select_by_value(&year.to_string())
        .await?;

    // The datepicker months are zero-based.
    let month_value = (month - 1).to_string();
    let month_select = browser::wait_for(driver, By::XPath(PICKER_MONTH), cx.browser.wait).await?;
    SelectElement::new(&month_select)
        .await?
        .select_by_value(&month_value)
        .await?;

    let day_cell = format!(
        "//td[@data-handler='selectDay' and @data-month='{}' and @data-year='{}']/a[text()='{}']",
        month_value, year, day
    );
    browser::wait_for(driver, By::XPath(day_cell), cx.browser.wait)
        .await?
        .click()
        .await?;
    Ok(())
}

async fn sort_by_modified(cx: &WalkContext<'_>) -> WebDriverResult<()> {
    let select = browser::wait_for(cx.driver, By::XPath(SORT_SELECT), cx.browser.wait).await?;
    SelectElement::new(&select)
        .await?
        .select_by_value(SORT_BY_MODIFIED)
        .await?;
    browser::settle(cx.browser).await;
    Ok(())
}

async fn read_result(
    cx: &WalkContext<'_>,
    link: &WebElement,
    date: &WebElement,
    body: &WebElement,
    keys: &mut KeyAllocator,
    out: &mut Vec<RawRecord>,
) -> Result<()> {
    let Some(url) = href(link).await? else {
        return Ok(());
    };
    let url = cx.absolute(&url);
    let name = link.text().await?.trim().to_string();
    let description = body.text().await?.trim().to_string();
    let date_text = date.text().await?;
    let Some(date) = normalize_date(&date_text) else {
        bail!("unrecognised date '{}'", date_text.trim());
    };

    let kind = if looks_like_document(&url) {
        ContentKind::Document
    } else {
        ContentKind::Page
    };
    let key = cx.key_for(keys, &date, &name);
    out.push(RawRecord {
        url,
        date,
        name,
        description,
        kind,
        key,
    });
    Ok(())
}
