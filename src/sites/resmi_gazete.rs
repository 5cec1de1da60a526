use anyhow::{bail, Result};
use regex::Regex;
use thirtyfour::prelude::*;
use tracing::{info, warn};

use super::browser::{self, href, is_active_link, type_and_submit};
use super::{looks_like_document, normalize_date, ContentKind, KeyAllocator, RawRecord, WalkContext};

const SEARCH_TOGGLE: &str =
    "body > div.container-fluid.mb-3 > div > div > div > div > div.col-12.col-md-8 > div > button";
const SEARCH_FIELD: &str = "genelaranacakkelime";
const RESULT_LINKS: &str = "//table[@id='filterTable']//a[@href]";
const RESULT_DATES: &str = "//table[@id='filterTable']//a[@href]/../../following-sibling::td";
const ISSUE_LINKS: &str = "//a[@href]";
const NEXT_PAGE: &str = "filterTable_next";

/// Full-text search over gazette issues. Each result opens an issue page in
/// a new window; every link on it whose text mentions the keyword as a
/// whole word becomes a record.
pub(super) async fn walk(cx: &WalkContext<'_>, out: &mut Vec<RawRecord>) -> Result<()> {
    let driver = cx.driver;
    driver.goto(cx.base_url).await?;
    browser::settle(cx.browser).await;

    info!("Searching for keyword: {}", cx.keyword);
    browser::wait_for(driver, By::Css(SEARCH_TOGGLE), cx.browser.wait)
        .await?
        .click()
        .await?;
    browser::settle(cx.browser).await;
    let field = browser::wait_for(driver, By::Id(SEARCH_FIELD), cx.browser.wait).await?;
    field.click().await?;
    type_and_submit(&field, cx.keyword).await?;
    browser::settle(cx.browser).await;

    let mention = Regex::new(&format!(r"\b{}\b", regex::escape(cx.keyword)))?;
    let mut keys = KeyAllocator::default();
    let mut page = 1u32;
    loop {
        info!("Processing page {}", page);
        if let Err(e) = read_page(cx, &mention, &mut keys, out).await {
            warn!("Error on page {}: {}. Continuing with the next page.", page, e);
        }

        if !cx.limit.allows_next(page) {
            break;
        }
        let Some(next) = driver.find_all(By::Id(NEXT_PAGE)).await?.into_iter().next() else {
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

async fn read_page(
    cx: &WalkContext<'_>,
    mention: &Regex,
    keys: &mut KeyAllocator,
    out: &mut Vec<RawRecord>,
) -> Result<()> {
    let driver = cx.driver;
    let results = browser::wait_for_all(driver, By::XPath(RESULT_LINKS), cx.browser.wait).await?;
    let mut dates = Vec::new();
    for cell in browser::wait_for_all(driver, By::XPath(RESULT_DATES), cx.browser.wait).await? {
        let text = cell.text().await?;
        if text.trim().len() == 10 {
            dates.push(text);
        }
    }

    let listing = driver.window().await?;
    for (result, date) in results.iter().zip(&dates) {
        let Some(date) = normalize_date(date) else {
            warn!("Unrecognised date '{}'", date.trim());
            continue;
        };
        result.click().await?;
        browser::settle(cx.browser).await;

        let opened = driver.windows().await?.into_iter().last();
        let Some(issue) = opened.filter(|handle| *handle != listing) else {
            bail!("result did not open a new window");
        };
        driver.switch_to_window(issue).await?;
        let read = read_issue(cx, mention, &date, keys, out).await;
        driver.close_window().await?;
        driver.switch_to_window(listing.clone()).await?;
        browser::settle(cx.browser).await;

        if let Err(e) = read {
            warn!("Skipping issue dated {}: {}", date, e);
        }
    }
    Ok(())
}

async fn read_issue(
    cx: &WalkContext<'_>,
    mention: &Regex,
    date: &str,
    keys: &mut KeyAllocator,
    out: &mut Vec<RawRecord>,
) -> Result<()> {
    let links = browser::wait_for_all(cx.driver, By::XPath(ISSUE_LINKS), cx.browser.wait).await?;
    for link in links {
        let text = link.text().await?.trim().to_string();
        if !mention.is_match(&text) {
            continue;
        }
        let Some(url) = href(&link).await? else { continue };
        let url = cx.absolute(&url);
        let kind = if looks_like_document(&url) {
            ContentKind::Document
        } else {
            ContentKind::Page
        };
        let key = cx.key_for(keys, date, &text);
        out.push(RawRecord {
            url,
            date: date.to_string(),
            name: key.clone(),
            description: text,
            kind,
            key,
        });
    }
    Ok(())
}
