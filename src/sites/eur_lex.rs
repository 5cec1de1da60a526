use anyhow::{bail, Result};
use thirtyfour::components::SelectElement;
use thirtyfour::prelude::*;
use tracing::{info, warn};

use super::browser::{self, first_within, href, is_active_link, type_and_submit};
use super::{normalize_date, ContentKind, KeyAllocator, RawRecord, WalkContext};

const SEARCH_FIELD: &str = "QuickSearchField";
const SORT_SELECT: &str = "//select[contains(@id, 'sortOne_top')]";
const SORT_BY_DATE: &str = "DD";
const RESULTS: &str = "//div[@id='EurlexContent']//div[@class='SearchResult']";
const RESULT_NAME: &str = ".//a[starts-with(@id, 'cellar_') and @href]";
const RESULT_PDF: &str = ".//a[starts-with(@title, 'pdf') and @href]";
const RESULT_HTML: &str = ".//a[starts-with(@title, 'html') and @href]";
const RESULT_DATE: &str = ".//dd[contains(text(), '/')]";
const NEXT_PAGE: &str = "//div[@class='ResultsTools']//a[@title='Next Page']";

/// Quick search, newest first, then page through result blocks. Each block
/// may offer a PDF and an HTML rendition; both share one key.
pub(super) async fn walk(cx: &WalkContext<'_>, out: &mut Vec<RawRecord>) -> Result<()> {
    let driver = cx.driver;
    driver.goto(cx.base_url).await?;
    browser::settle(cx.browser).await;

    info!("Searching for keyword: {}", cx.keyword);
    let field = browser::wait_for(driver, By::Id(SEARCH_FIELD), cx.browser.wait).await?;
    type_and_submit(&field, cx.keyword).await?;
    browser::settle(cx.browser).await;

    if let Err(e) = sort_by_date(cx).await {
        bail!("No results found for '{}': {}", cx.keyword, e);
    }

    let mut keys = KeyAllocator::default();
    let mut page = 1u32;
    loop {
        info!("Processing page {}", page);
        let results = browser::wait_for_all(driver, By::XPath(RESULTS), cx.browser.wait).await?;
        for result in &results {
            if let Err(e) = read_result(cx, result, &mut keys, out).await {
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

async fn sort_by_date(cx: &WalkContext<'_>) -> WebDriverResult<()> {
    let select = browser::wait_for(cx.driver, By::XPath(SORT_SELECT), cx.browser.wait).await?;
    SelectElement::new(&select).await?.select_by_value(SORT_BY_DATE).await?;
    browser::settle(cx.browser).await;
    Ok(())
}

async fn read_result(
    cx: &WalkContext<'_>,
    result: &WebElement,
    keys: &mut KeyAllocator,
    out: &mut Vec<RawRecord>,
) -> Result<()> {
    let Some(name_el) = first_within(result, By::XPath(RESULT_NAME)).await? else {
        return Ok(());
    };
    let Some(date_el) = first_within(result, By::XPath(RESULT_DATE)).await? else {
        return Ok(());
    };
    let title = name_el.text().await?.trim().to_string();
    let date_text = date_el.text().await?;
    let Some(date) = normalize_date(&date_text) else {
        bail!("unrecognised date '{}'", date_text.trim());
    };

    let mut links = Vec::new();
    let renditions = [
        (RESULT_PDF, ContentKind::Document),
        (RESULT_HTML, ContentKind::Page),
    ];
    for (selector, kind) in renditions {
        if let Some(link) = first_within(result, By::XPath(selector)).await? {
            if let Some(url) = href(&link).await? {
                links.push((cx.absolute(&url), kind));
            }
        }
    }
    if links.is_empty() {
        return Ok(());
    }

    let key = cx.key_for(keys, &date, &title);
    for (url, kind) in links {
        out.push(RawRecord {
            url,
            date: date.clone(),
            name: key.clone(),
            description: title.clone(),
            kind,
            key: key.clone(),
        });
    }
    Ok(())
}
