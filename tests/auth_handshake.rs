mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use opends4::auth::{KEY_FILE_SIZE, RESPONSE_SIZE};
use opends4::control::HID_REPORT_TYPE_FEATURE;
use opends4::report::{AuthReport, AuthStatusReport};
use opends4::{AuthEngine, AuthStatusCode, ControlDispatcher, FeatureConfiguration, ReportType};
use rsa::pss::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use sha2::Sha256;

fn dispatcher() -> (ControlDispatcher, VerifyingKey<Sha256>, Vec<u8>) {
    let key = common::test_key();
    let verifier = VerifyingKey::<Sha256>::new(key.public_key().clone());
    let identity = key.signed_identity().to_vec();
    let auth = AuthEngine::new(Arc::new(key)).unwrap();
    let control = ControlDispatcher::new(Arc::new(auth), FeatureConfiguration::default());
    (control, verifier, identity)
}

fn get(control: &ControlDispatcher, report: ReportType) -> Vec<u8> {
    control
        .get_report(HID_REPORT_TYPE_FEATURE, report.id())
        .unwrap()
}

fn upload(control: &ControlDispatcher, seq: u8, nonce: &[u8], page_size: usize) {
    for (page, chunk) in nonce.chunks(page_size).enumerate() {
        let mut report = AuthReport::new(ReportType::SetChallenge, seq, page as u8);
        report.data[..chunk.len()].copy_from_slice(chunk);
        report.fill_crc();
        control
            .set_report(
                HID_REPORT_TYPE_FEATURE,
                ReportType::SetChallenge.id(),
                &report.to_bytes(),
            )
            .unwrap();
    }
}

fn wait_ready(control: &ControlDispatcher) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = AuthStatusReport::from_bytes(&get(control, ReportType::GetAuthStatus)).unwrap();
        assert!(status.crc_valid());
        match status.status {
            0x00 => return,
            0x01 => {}
            other => panic!("unexpected auth status 0x{:02x}", other),
        }
        assert!(Instant::now() < deadline, "signing did not finish");
        thread::sleep(Duration::from_millis(10));
    }
}

fn download(control: &ControlDispatcher, seq: u8, page_size: usize) -> Vec<u8> {
    let pages = RESPONSE_SIZE.div_ceil(page_size);
    let mut response = Vec::with_capacity(RESPONSE_SIZE);
    for page in 0..pages {
        let report = AuthReport::from_bytes(&get(control, ReportType::GetResponse)).unwrap();
        assert!(report.crc_valid());
        assert_eq!(report.seq, seq);
        assert_eq!(report.page as usize, page);
        let take = page_size.min(RESPONSE_SIZE - response.len());
        response.extend_from_slice(&report.data[..take]);
    }
    response
}

#[test]
fn host_handshake_verifies_against_identity_key() {
    let (control, verifier, identity) = dispatcher();
    let nonce: Vec<u8> = (0..0x100).map(|i| (i * 7 + 3) as u8).collect();

    upload(&control, 0x2a, &nonce, 56);
    wait_ready(&control);
    let response = download(&control, 0x2a, 56);

    let signature = Signature::try_from(&response[..0x100]).unwrap();
    verifier.verify(&nonce, &signature).unwrap();
    assert_eq!(&response[0x100..], identity.as_slice());

    // Reading the last page ends the handshake
    assert_eq!(control.auth().status(), AuthStatusCode::Idle);
}

#[test]
fn handshake_with_renegotiated_page_sizes() {
    let (control, verifier, _) = dispatcher();
    control.auth().set_page_sizes(32, 40).unwrap();
    assert_eq!(
        hex::encode(get(&control, ReportType::GetAuthPageSize)),
        "f300202800000000"
    );

    let nonce = [0x5au8; 0x100];
    upload(&control, 3, &nonce, 32);
    wait_ready(&control);
    let response = download(&control, 3, 40);

    let signature = Signature::try_from(&response[..0x100]).unwrap();
    verifier.verify(&nonce, &signature).unwrap();
    assert_eq!(control.auth().status(), AuthStatusCode::Idle);
}

#[test]
fn back_to_back_handshakes() {
    let (control, verifier, _) = dispatcher();
    for seq in 1..=2u8 {
        let nonce = [seq; 0x100];
        upload(&control, seq, &nonce, 56);
        wait_ready(&control);
        let response = download(&control, seq, 56);
        let signature = Signature::try_from(&response[..0x100]).unwrap();
        verifier.verify(&nonce, &signature).unwrap();
    }
}

#[test]
fn key_file_round_trip() {
    let path = std::env::temp_dir().join(format!("opends4-key-{}.bin", std::process::id()));
    std::fs::write(&path, common::test_key_bytes()).unwrap();
    let key = opends4::KeyMaterial::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(hex::encode(key.serial()), "000000000000000000010001deadbeef");
    assert_eq!(common::test_key_bytes().len(), KEY_FILE_SIZE);
}
