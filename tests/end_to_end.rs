use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use uik_recon::cell_store::{dump_cells, load_cells};
use uik_recon::content_cache::{CacheEntry, ContentCache, Retriever};
use uik_recon::crawl::crawl;
use uik_recon::feature_schema::{Feature, FeatureSchema};
use uik_recon::geocoder::AddressGeocoder;
use uik_recon::models::{CommissionLevel, Coordinates};
use uik_recon::reconcile::reconcile;
use uik_recon::result_table::{decode_page, parse_result_page};
use uik_recon::roster::{build_commission_tree, read_roster, roster_addresses};

const ROOT: &str = "http://vybory.test/region/kirov?action=show&root=1&vibid=4434000001&type=233";
const TIK_PAGE: &str = "http://vybory.test/region/kirov?action=show&vibid=4434000123&type=233";

const ROSTER: &str = "id,iz_id,reserve_iz_id,parent_id,name,region,address,type_ik\n\
    1,4434000.0,,,Избирательная комиссия Кировской области,Кировская область,,ik\n\
    2,4434001,,1,Ленинская ТИК,Кировская область,,tik\n\
    3,4434002,,2,Участковая избирательная комиссия №57,Кировская область,\"г. Киров, ул. Ленина, 1\",uik\n\
    4,4434003,,2,Участковая избирательная комиссия №60,Кировская область,\"г. Киров, ул. Труда, 5\",uik\n";

const GEOCODED: &str = r#"{"response":{"GeoObjectCollection":{"featureMember":[
    {"GeoObject":{"Point":{"pos":"49.668023 58.603595"}}}]}}}"#;

// Row r, column c of the protocol table holds 1000 * (c + 1) + r.
fn station_page(labels: &[&str]) -> String {
    let header: String = labels
        .iter()
        .map(|l| format!("<td><nobr>{}</nobr></td>", l))
        .collect();
    let rows: String = (0..26)
        .map(|row| {
            let cells: String = (0..labels.len())
                .map(|col| format!("<td align=right><b>{}</b></td>", 1000 * (col + 1) + row))
                .collect();
            format!("<tr>{}</tr>", cells)
        })
        .collect();
    format!(
        "<html><body><table><tr><td width=\"10%\"></td><td width=\"90%\">\
         <table><tr>{}</tr>{}</table></td></tr></table></body></html>",
        header, rows
    )
}

struct ElectionSite {
    calls: AtomicUsize,
}

fn site() -> ElectionSite {
    ElectionSite {
        calls: AtomicUsize::new(0),
    }
}

#[async_trait]
impl Retriever for ElectionSite {
    async fn retrieve(&self, url: &str) -> Option<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = match url {
            ROOT => format!(
                r#"<html><a style="TEXT-DECORATION: none" href="{}">Ленинская</a></html>"#,
                TIK_PAGE
            ),
            TIK_PAGE => station_page(&["УИК №57", "УИК №58"]),
            _ => return None,
        };
        Some(body.into_bytes())
    }
}

struct Geocoder;

#[async_trait]
impl Retriever for Geocoder {
    async fn retrieve(&self, address: &str) -> Option<Vec<u8>> {
        address
            .contains("Ленина")
            .then(|| GEOCODED.as_bytes().to_vec())
    }
}

#[tokio::test]
async fn crawl_parse_and_join_one_station() {
    let dir = tempfile::tempdir().unwrap();
    let schema = FeatureSchema::duma_2011();

    let pages = ContentCache::open(
        dir.path().join("html"),
        "html",
        site(),
    )
    .unwrap();
    let leaves = crawl(&pages, ROOT, 1, 4, |_, _| {}).await.unwrap();
    assert_eq!(leaves, vec![TIK_PAGE.to_string()]);

    let mut cells = Vec::new();
    for key in &leaves {
        let Some(CacheEntry::Payload(bytes)) = pages.load(key).await.unwrap() else {
            panic!("page {key} was not cached");
        };
        cells.extend(parse_result_page(key, &decode_page(&bytes), &schema).unwrap());
    }
    assert_eq!(cells.len(), 2 * 25);

    let cells_path = dir.path().join("cells.json");
    dump_cells(&cells_path, &cells, &schema).unwrap();
    let cells = load_cells(&cells_path, &schema).unwrap();

    let records = read_roster(ROSTER.as_bytes()).unwrap();
    let geocoder = AddressGeocoder::with_cache(
        ContentCache::open(dir.path().join("address"), "json", Geocoder).unwrap(),
    );
    let coordinates = geocoder
        .resolve_all(&roster_addresses(&records), 2, |_| {})
        .await
        .unwrap();
    assert_eq!(coordinates.len(), 1);

    let stations = build_commission_tree(records, &coordinates).unwrap();
    assert_eq!(stations.len(), 2);

    let joined = reconcile(stations, cells).unwrap();
    assert_eq!(joined.records.len(), 1);
    assert_eq!(joined.report.unmatched_stations, 1);
    assert_eq!(joined.report.unmatched_groups, 1);

    let record = &joined.records[0];
    assert_eq!(record.station_number, 57);
    assert_eq!(record.region, "Кировская область");
    assert_eq!(record.parent.level, CommissionLevel::Territorial);
    assert_eq!(record.parent.external_id, Some(4434001));
    let address = record.address.as_ref().unwrap();
    assert_eq!(address.text, "г. Киров, ул. Ленина, 1");
    assert_eq!(
        address.coordinates,
        Some(Coordinates { longitude: 49.668023, latitude: 58.603595 })
    );
    assert_eq!(record.stats.registered_voters, 1000);
    assert_eq!(record.stats.ballots_issued, 1001);
    assert_eq!(record.stats.valid_ballots, 1009);
    assert_eq!(record.stats.votes.spravedlivaya_rossiya, 1019);
    assert_eq!(record.stats.votes.edinaya_rossiya, 1024);
    assert_eq!(record.stats.votes.pravo, 1025);
    assert_eq!(record.stats.protocol[&Feature::BallotsUnaccounted], 1017);
}

#[tokio::test]
async fn second_run_replays_from_disk() {
    let dir = tempfile::tempdir().unwrap();

    let first = ContentCache::open(dir.path(), "html", site()).unwrap();
    let leaves = crawl(&first, ROOT, 1, 2, |_, _| {}).await.unwrap();
    assert_eq!(first.retriever().calls.load(Ordering::SeqCst), 2);

    let second = ContentCache::open(dir.path(), "html", site()).unwrap();
    let replayed = crawl(&second, ROOT, 1, 2, |_, _| {}).await.unwrap();

    assert_eq!(replayed, leaves);
    assert_eq!(second.retriever().calls.load(Ordering::SeqCst), 0);
    let mut listed = second.list_cached().await.unwrap();
    listed.sort();
    let mut expected = vec![ROOT.to_string(), TIK_PAGE.to_string()];
    expected.sort();
    assert_eq!(listed, expected);
}

#[tokio::test]
async fn recorded_failure_can_be_purged_and_retried() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ContentCache::open(dir.path(), "html", site()).unwrap();
    let missing = "http://vybory.test/gone?vibid=1";

    assert!(cache.fetch(missing).await.unwrap().is_failure());
    assert!(cache.fetch(missing).await.unwrap().is_failure());
    assert_eq!(cache.retriever().calls.load(Ordering::SeqCst), 1);

    assert!(cache.purge(missing).await.unwrap());
    assert!(cache.load(missing).await.unwrap().is_none());
    cache.fetch(missing).await.unwrap();
    assert_eq!(cache.retriever().calls.load(Ordering::SeqCst), 2);
}
