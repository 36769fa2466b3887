//! Concrete provider integrations
//!
//! Each source normalizes its wire format into [`IpInfo`]. Response
//! structs mirror only the fields we consume; everything else is
//! ignored. Mapping is kept separate from the HTTP fetch so it can be
//! tested against canned payloads.

use super::{parse_asn, ProviderError, Query};
use crate::datacenter;
use crate::types::IpInfo;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::IpAddr;

/// Fetch a JSON document, mapping non-success statuses to errors.
async fn fetch_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T, ProviderError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body: String = resp
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(512)
            .collect();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json::<T>().await?)
}

/// A result that reports no ASN must not carry an organization either.
fn normalized(mut info: IpInfo) -> IpInfo {
    if info.asn == 0 {
        info.asn_org.clear();
    }
    info
}

// ---- ip-api.com ----

pub struct IpApi {
    client: Client,
}

impl IpApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    country: String,
    #[serde(default, rename = "countryCode")]
    country_code: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    isp: String,
    #[serde(default)]
    org: String,
    #[serde(default, rename = "as")]
    asn_text: String,
    #[serde(default)]
    hosting: bool,
    #[serde(default)]
    proxy: bool,
}

fn ip_api_to_info(ip: IpAddr, resp: IpApiResponse) -> Result<IpInfo, ProviderError> {
    if resp.status != "success" {
        return Err(ProviderError::Api(format!("ip-api error: {}", resp.message)));
    }
    Ok(normalized(IpInfo {
        ip: ip.to_string(),
        is_datacenter: resp.hosting,
        is_proxy: resp.proxy,
        asn: parse_asn(&resp.asn_text),
        asn_org: resp.org,
        isp: resp.isp,
        country: resp.country,
        country_code: resp.country_code,
        city: resp.city,
        source: "ip-api".to_string(),
        ..IpInfo::default()
    }))
}

#[async_trait]
impl Query for IpApi {
    async fn query(&self, ip: IpAddr) -> Result<IpInfo, ProviderError> {
        let url = format!(
            "http://ip-api.com/json/{ip}?fields=status,message,country,countryCode,city,isp,org,as,hosting,proxy"
        );
        ip_api_to_info(ip, fetch_json(&self.client, &url).await?)
    }
}

// ---- ipwhois.app ----

pub struct IpWhois {
    client: Client,
}

impl IpWhois {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Debug, Default, Deserialize)]
struct IpWhoisSecurity {
    #[serde(default)]
    anonymous: bool,
    #[serde(default)]
    proxy: bool,
    #[serde(default)]
    vpn: bool,
    #[serde(default)]
    tor: bool,
    #[serde(default)]
    hosting: bool,
}

#[derive(Debug, Deserialize)]
struct IpWhoisResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    country: String,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    isp: String,
    #[serde(default)]
    org: String,
    #[serde(default)]
    asn: String,
    #[serde(default)]
    security: IpWhoisSecurity,
}

fn ipwhois_to_info(ip: IpAddr, resp: IpWhoisResponse) -> Result<IpInfo, ProviderError> {
    if !resp.success {
        return Err(ProviderError::Api("ipwhois lookup refused".to_string()));
    }
    Ok(normalized(IpInfo {
        ip: ip.to_string(),
        is_datacenter: resp.security.hosting,
        is_proxy: resp.security.proxy || resp.security.anonymous,
        is_vpn: resp.security.vpn,
        is_tor: resp.security.tor,
        asn: parse_asn(&resp.asn),
        asn_org: resp.org,
        isp: resp.isp,
        country: resp.country,
        country_code: resp.country_code,
        city: resp.city,
        source: "ipwhois".to_string(),
        ..IpInfo::default()
    }))
}

#[async_trait]
impl Query for IpWhois {
    async fn query(&self, ip: IpAddr) -> Result<IpInfo, ProviderError> {
        let url = format!("https://ipwhois.app/json/{ip}?security=1");
        ipwhois_to_info(ip, fetch_json(&self.client, &url).await?)
    }
}

// ---- freeipapi.com ----

pub struct FreeIpApi {
    client: Client,
}

impl FreeIpApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct FreeIpApiResponse {
    #[serde(default, rename = "countryName")]
    country_name: String,
    #[serde(default, rename = "countryCode")]
    country_code: String,
    #[serde(default, rename = "cityName")]
    city_name: String,
    #[serde(default, rename = "isProxy")]
    is_proxy: bool,
}

fn freeipapi_to_info(ip: IpAddr, resp: FreeIpApiResponse) -> IpInfo {
    IpInfo {
        ip: ip.to_string(),
        is_proxy: resp.is_proxy,
        country: resp.country_name,
        country_code: resp.country_code,
        city: resp.city_name,
        source: "freeipapi".to_string(),
        ..IpInfo::default()
    }
}

#[async_trait]
impl Query for FreeIpApi {
    async fn query(&self, ip: IpAddr) -> Result<IpInfo, ProviderError> {
        let url = format!("https://freeipapi.com/api/json/{ip}");
        Ok(freeipapi_to_info(ip, fetch_json(&self.client, &url).await?))
    }
}

// ---- ipapi.co ----

pub struct IpApiCo {
    client: Client,
}

impl IpApiCo {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct IpApiCoResponse {
    #[serde(default, rename = "country_name")]
    country_name: String,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    org: String,
    #[serde(default)]
    asn: String,
}

fn ipapi_co_to_info(ip: IpAddr, resp: IpApiCoResponse) -> IpInfo {
    let asn = parse_asn(&resp.asn);
    // ipapi.co reports no hosting flag, so cross-check the registry here.
    let is_datacenter = datacenter::known_datacenter(asn).is_some();
    normalized(IpInfo {
        ip: ip.to_string(),
        is_datacenter,
        asn,
        asn_org: resp.org.clone(),
        isp: resp.org,
        country: resp.country_name,
        country_code: resp.country_code,
        city: resp.city,
        source: "ipapi-co".to_string(),
        ..IpInfo::default()
    })
}

#[async_trait]
impl Query for IpApiCo {
    async fn query(&self, ip: IpAddr) -> Result<IpInfo, ProviderError> {
        let url = format!("https://ipapi.co/{ip}/json/");
        Ok(ipapi_co_to_info(ip, fetch_json(&self.client, &url).await?))
    }
}

// ---- ipdata.co (key-gated) ----

pub struct IpData {
    client: Client,
    api_key: String,
}

impl IpData {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[derive(Debug, Default, Deserialize)]
struct IpDataAsn {
    #[serde(default)]
    asn: String,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
struct IpDataThreat {
    #[serde(default)]
    is_datacenter: bool,
    #[serde(default)]
    is_proxy: bool,
    #[serde(default)]
    is_anonymous: bool,
    #[serde(default)]
    is_tor: bool,
}

#[derive(Debug, Deserialize)]
struct IpDataResponse {
    #[serde(default, rename = "country_name")]
    country_name: String,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    asn: IpDataAsn,
    #[serde(default)]
    threat: IpDataThreat,
}

fn ipdata_to_info(ip: IpAddr, resp: IpDataResponse) -> IpInfo {
    normalized(IpInfo {
        ip: ip.to_string(),
        is_datacenter: resp.threat.is_datacenter || resp.asn.kind == "hosting",
        is_proxy: resp.threat.is_proxy || resp.threat.is_anonymous,
        is_tor: resp.threat.is_tor,
        asn: parse_asn(&resp.asn.asn),
        asn_org: resp.asn.name.clone(),
        isp: resp.asn.name,
        country: resp.country_name,
        country_code: resp.country_code,
        city: resp.city,
        source: "ipdata".to_string(),
        ..IpInfo::default()
    })
}

#[async_trait]
impl Query for IpData {
    async fn query(&self, ip: IpAddr) -> Result<IpInfo, ProviderError> {
        let url = format!("https://api.ipdata.co/{ip}?api-key={}", self.api_key);
        Ok(ipdata_to_info(ip, fetch_json(&self.client, &url).await?))
    }
}

// ---- ipinfo.io (key-gated) ----

pub struct IpInfoIo {
    client: Client,
    token: String,
}

impl IpInfoIo {
    pub fn new(client: Client, token: String) -> Self {
        Self { client, token }
    }
}

#[derive(Debug, Default, Deserialize)]
struct IpInfoIoPrivacy {
    #[serde(default)]
    vpn: bool,
    #[serde(default)]
    proxy: bool,
    #[serde(default)]
    tor: bool,
    #[serde(default)]
    relay: bool,
    #[serde(default)]
    hosting: bool,
}

#[derive(Debug, Deserialize)]
struct IpInfoIoResponse {
    #[serde(default)]
    city: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    org: String,
    #[serde(default)]
    privacy: IpInfoIoPrivacy,
}

fn ipinfo_to_info(ip: IpAddr, resp: IpInfoIoResponse) -> IpInfo {
    normalized(IpInfo {
        ip: ip.to_string(),
        is_datacenter: resp.privacy.hosting,
        is_proxy: resp.privacy.proxy || resp.privacy.relay,
        is_vpn: resp.privacy.vpn,
        is_tor: resp.privacy.tor,
        asn: parse_asn(&resp.org),
        asn_org: resp.org.clone(),
        isp: resp.org,
        country: resp.country,
        city: resp.city,
        source: "ipinfo".to_string(),
        ..IpInfo::default()
    })
}

#[async_trait]
impl Query for IpInfoIo {
    async fn query(&self, ip: IpAddr) -> Result<IpInfo, ProviderError> {
        let url = format!("https://ipinfo.io/{ip}?token={}", self.token);
        Ok(ipinfo_to_info(ip, fetch_json(&self.client, &url).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "203.0.113.7".parse().expect("ip")
    }

    #[test]
    fn test_ip_api_success_mapping() {
        let resp: IpApiResponse = serde_json::from_str(
            r#"{
                "status": "success",
                "country": "United States",
                "countryCode": "US",
                "city": "Ashburn",
                "isp": "Amazon.com, Inc.",
                "org": "AWS EC2",
                "as": "AS16509 Amazon.com, Inc.",
                "hosting": true,
                "proxy": false
            }"#,
        )
        .expect("parse");
        let info = ip_api_to_info(ip(), resp).expect("map");
        assert!(info.is_datacenter);
        assert!(!info.is_proxy);
        assert_eq!(info.asn, 16509);
        assert_eq!(info.asn_org, "AWS EC2");
        assert_eq!(info.country_code, "US");
        assert_eq!(info.source, "ip-api");
    }

    #[test]
    fn test_ip_api_failure_status() {
        let resp: IpApiResponse = serde_json::from_str(
            r#"{"status": "fail", "message": "private range"}"#,
        )
        .expect("parse");
        let err = ip_api_to_info(ip(), resp).expect_err("fail status");
        assert!(err.to_string().contains("private range"));
    }

    #[test]
    fn test_ipwhois_mapping_combines_anonymous_into_proxy() {
        let resp: IpWhoisResponse = serde_json::from_str(
            r#"{
                "success": true,
                "country": "Netherlands",
                "country_code": "NL",
                "city": "Amsterdam",
                "isp": "Example ISP",
                "org": "Example Org",
                "asn": "AS9009",
                "security": {"anonymous": true, "proxy": false, "vpn": true, "tor": false, "hosting": false}
            }"#,
        )
        .expect("parse");
        let info = ipwhois_to_info(ip(), resp).expect("map");
        assert!(info.is_proxy);
        assert!(info.is_vpn);
        assert!(!info.is_tor);
        assert_eq!(info.asn, 9009);
        assert_eq!(info.source, "ipwhois");
    }

    #[test]
    fn test_ipwhois_refused() {
        let resp: IpWhoisResponse =
            serde_json::from_str(r#"{"success": false}"#).expect("parse");
        assert!(ipwhois_to_info(ip(), resp).is_err());
    }

    #[test]
    fn test_freeipapi_mapping() {
        let resp: FreeIpApiResponse = serde_json::from_str(
            r#"{"countryName": "Germany", "countryCode": "DE", "cityName": "Berlin", "isProxy": true}"#,
        )
        .expect("parse");
        let info = freeipapi_to_info(ip(), resp);
        assert!(info.is_proxy);
        assert_eq!(info.asn, 0);
        assert_eq!(info.asn_org, "");
        assert_eq!(info.city, "Berlin");
        assert_eq!(info.source, "freeipapi");
    }

    #[test]
    fn test_ipapi_co_registry_cross_check() {
        let resp: IpApiCoResponse = serde_json::from_str(
            r#"{"country_name": "United States", "country_code": "US", "city": "Clifton", "org": "DigitalOcean, LLC", "asn": "AS14061"}"#,
        )
        .expect("parse");
        let info = ipapi_co_to_info(ip(), resp);
        assert!(info.is_datacenter);
        assert_eq!(info.asn, 14061);
        assert_eq!(info.isp, "DigitalOcean, LLC");
        assert_eq!(info.source, "ipapi-co");
    }

    #[test]
    fn test_ipapi_co_unknown_asn_not_datacenter() {
        let resp: IpApiCoResponse = serde_json::from_str(
            r#"{"org": "Some Transit", "asn": "AS3356"}"#,
        )
        .expect("parse");
        let info = ipapi_co_to_info(ip(), resp);
        assert!(!info.is_datacenter);
        assert_eq!(info.asn, 3356);
    }

    #[test]
    fn test_ipdata_hosting_type_counts_as_datacenter() {
        let resp: IpDataResponse = serde_json::from_str(
            r#"{
                "country_name": "France",
                "country_code": "FR",
                "city": "Paris",
                "asn": {"asn": "AS16276", "name": "OVH SAS", "type": "hosting"},
                "threat": {"is_datacenter": false, "is_proxy": false, "is_anonymous": true, "is_tor": false}
            }"#,
        )
        .expect("parse");
        let info = ipdata_to_info(ip(), resp);
        assert!(info.is_datacenter);
        assert!(info.is_proxy);
        assert_eq!(info.asn, 16276);
        assert_eq!(info.asn_org, "OVH SAS");
        assert_eq!(info.source, "ipdata");
    }

    #[test]
    fn test_ipinfo_mapping_relay_counts_as_proxy() {
        let resp: IpInfoIoResponse = serde_json::from_str(
            r#"{
                "city": "Mountain View",
                "country": "US",
                "org": "AS15169 Google LLC",
                "privacy": {"vpn": false, "proxy": false, "tor": false, "relay": true, "hosting": true}
            }"#,
        )
        .expect("parse");
        let info = ipinfo_to_info(ip(), resp);
        assert!(info.is_datacenter);
        assert!(info.is_proxy);
        assert_eq!(info.asn, 15169);
        assert_eq!(info.source, "ipinfo");
    }

    #[test]
    fn test_missing_fields_tolerated() {
        // Sparse payloads must parse; absent fields default.
        let resp: IpInfoIoResponse = serde_json::from_str(r#"{}"#).expect("parse");
        let info = ipinfo_to_info(ip(), resp);
        assert_eq!(info.asn, 0);
        assert_eq!(info.asn_org, "");
        assert!(!info.is_datacenter);
    }
}
