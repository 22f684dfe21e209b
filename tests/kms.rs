//! KMS exchange integration tests.
//!
//! Key documents wrapped by a remote KMS move the context into NEED_KMS;
//! replies are fed back as raw HTTP bytes.

mod support;
use support::*;

use serde_json::{json, Value};

use fieldcrypt::core::fle::{marking_value, Algorithm};
use fieldcrypt::core::key_vault::KeyRef;
use fieldcrypt::error::{ClientError, Error, KmsError};
use fieldcrypt::{Buffer, Context, KmsRequestKind, State, StatusKind};

fn marking(key: u8, value: &str) -> Value {
    marking_value(Algorithm::Random, &KeyRef::Id(key_id(key)), json!(value))
}

/// A command whose `ssn` field is sealed under data key 1.
fn sealed_command() -> Vec<u8> {
    Test::new().encrypt_local(1, &DATA_KEY, find_command(marking(1, "457-55-5462")))
}

/// A document with fields sealed under data keys 1 and 2.
fn sealed_two_keys() -> Vec<u8> {
    let t = Test::new();
    let mut ctx = t.client.encrypt_context("test.test");
    feed_phase(&mut ctx, State::NeedMongoCollinfo, &[collinfo("test", encrypting_schema())]);
    let command = json!({"insert": "test", "documents": [{"a": marking(1, "first"), "b": marking(2, "second")}]});
    feed_phase(&mut ctx, State::NeedMongoMarkings, &[markings_reply(command)]);
    feed_phase(
        &mut ctx,
        State::NeedMongoKeys,
        &[
            local_key_document(t.hooks.as_ref(), 1, &DATA_KEY),
            local_key_document(t.hooks.as_ref(), 2, &DATA_KEY),
        ],
    );
    ctx.finalize().unwrap().into_vec()
}

/// Run a decrypt context up to NEED_KMS.
fn decrypt_until_kms(t: &Test, sealed: &[u8], key_documents: &[Vec<u8>]) -> Context {
    let mut ctx = t.client.decrypt_context(&Buffer::wrap(sealed));
    feed_phase(&mut ctx, State::NeedMongoCollinfo, &[]);
    feed_phase(&mut ctx, State::NeedMongoKeys, key_documents);
    assert_state(&ctx, State::NeedKms);
    ctx
}

fn message(request: &fieldcrypt::KmsRequest) -> String {
    String::from_utf8_lossy(request.message().data()).into_owned()
}

fn finish(ctx: &mut Context) -> Value {
    assert_state(ctx, State::Ready);
    let out = serde_json::from_slice(ctx.finalize().unwrap().data()).unwrap();
    assert_state(ctx, State::Done);
    out
}

#[test]
fn test_aws_decrypt_request() {
    let t = Test::with_credentials(vec![aws_credentials()]);
    let mut ctx = decrypt_until_kms(&t, &sealed_command(), &[aws_key_document(1)]);

    let requests: Vec<_> = ctx.kms_requests().unwrap().collect();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.kind(), KmsRequestKind::AwsDecrypt);
    assert_eq!(request.endpoint(), "kms.us-east-1.amazonaws.com:443");
    assert_eq!(request.key_id(), Some(key_id(1)));
    assert!(request.bytes_needed() > 0);

    let text = message(request);
    assert!(text.starts_with("POST / HTTP/1.1\r\n"));
    assert!(text.contains("Host: kms.us-east-1.amazonaws.com\r\n"));
    assert!(text.contains("X-Amz-Target: TrentService.Decrypt\r\n"));
    assert!(text.contains("Authorization: AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
    assert!(text.contains("/us-east-1/kms/aws4_request"));
    assert!(text.contains(&base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        WRAPPED_MATERIAL
    )));
}

#[test]
fn test_aws_round_trip() {
    let t = Test::with_credentials(vec![aws_credentials()]);
    let mut ctx = decrypt_until_kms(&t, &sealed_command(), &[aws_key_document(1)]);
    answer_kms(&mut ctx, |_| aws_decrypt_reply(&DATA_KEY));
    let out = finish(&mut ctx);
    assert_eq!(out["filter"]["ssn"], "457-55-5462");
}

#[test]
fn test_reply_fed_one_byte_at_a_time() {
    let t = Test::with_credentials(vec![aws_credentials()]);
    let mut ctx = decrypt_until_kms(&t, &sealed_command(), &[aws_key_document(1)]);
    let reply = aws_decrypt_reply(&DATA_KEY);

    for request in ctx.kms_requests().unwrap() {
        let mut previous = request.bytes_needed();
        for (i, byte) in reply.iter().enumerate() {
            request.feed(&Buffer::wrap(std::slice::from_ref(byte))).unwrap();
            let needed = request.bytes_needed();
            assert!(needed <= previous, "bytes_needed grew at byte {}", i);
            if i + 1 < reply.len() {
                assert!(needed > 0);
            }
            previous = needed;
        }
        assert_eq!(request.bytes_needed(), 0);
    }
    ctx.mark_kms_done().unwrap();
    finish(&mut ctx);
}

#[test]
fn test_feed_after_satisfied() {
    let t = Test::with_credentials(vec![aws_credentials()]);
    let mut ctx = decrypt_until_kms(&t, &sealed_command(), &[aws_key_document(1)]);

    for request in ctx.kms_requests().unwrap() {
        request.feed(&Buffer::wrap(&aws_decrypt_reply(&DATA_KEY))).unwrap();
        let err = request.feed(&Buffer::wrap(b"x")).unwrap_err();
        assert!(matches!(err, Error::Client(ClientError::KmsSatisfied)));
        assert_eq!(request.status().kind(), StatusKind::ClientError);
    }
    assert!(ctx.mark_kms_done().is_err());
    assert_eq!(ctx.state(), State::Error);
    assert_failed(&ctx, StatusKind::KmsError);
}

#[test]
fn test_unterminated_header_block_fails_feed() {
    let t = Test::with_credentials(vec![aws_credentials()]);
    let mut ctx = decrypt_until_kms(&t, &sealed_command(), &[aws_key_document(1)]);

    for request in ctx.kms_requests().unwrap() {
        request.feed(&Buffer::wrap(b"HTTP/1.1 200 OK\r\nX-Pad: ")).unwrap();
        let padding = vec![b'a'; request.bytes_needed()];
        let err = request.feed(&Buffer::wrap(&padding)).unwrap_err();
        assert!(matches!(err, Error::Kms(KmsError::ResponseTooLarge(_))));
        assert_eq!(request.status().kind(), StatusKind::KmsError);
        assert_eq!(request.bytes_needed(), 0);
    }
    assert!(ctx.mark_kms_done().is_err());
    assert_failed(&ctx, StatusKind::KmsError);
}

#[test]
fn test_overfeed_in_one_chunk_fails_request() {
    let t = Test::with_credentials(vec![aws_credentials()]);
    let mut ctx = decrypt_until_kms(&t, &sealed_command(), &[aws_key_document(1)]);

    for request in ctx.kms_requests().unwrap() {
        let mut reply = aws_decrypt_reply(&DATA_KEY);
        reply.extend_from_slice(b"trailing");
        let err = request.feed(&Buffer::wrap(&reply)).unwrap_err();
        assert!(matches!(err, Error::Kms(KmsError::TooManyBytes { .. })));
        assert_eq!(request.bytes_needed(), 0);
    }
    assert!(ctx.mark_kms_done().is_err());
    assert_failed(&ctx, StatusKind::KmsError);
}

#[test]
fn test_http_error_moves_context_to_error() {
    let t = Test::with_credentials(vec![aws_credentials()]);
    let mut ctx = decrypt_until_kms(&t, &sealed_command(), &[aws_key_document(1)]);

    for request in ctx.kms_requests().unwrap() {
        let reply = http_reply(400, &json!({"__type": "AccessDeniedException", "message": "not allowed"}));
        assert!(request.feed(&Buffer::wrap(&reply)).is_err());
        assert_eq!(request.status().kind(), StatusKind::KmsError);
        assert_eq!(request.status().code(), 400);
        assert_eq!(request.bytes_needed(), 0);
    }
    assert!(ctx.mark_kms_done().is_err());
    assert_failed(&ctx, StatusKind::KmsError);
    assert!(ctx.status().message().contains("not allowed"));
}

#[test]
fn test_malformed_replies() {
    let replies: Vec<Vec<u8>> = vec![
        b"SMTP/1.0 220 hello\r\n\r\n".to_vec(),
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 70000\r\n\r\n".to_vec(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\nnot json".to_vec(),
        http_reply(200, &json!({"KeyId": "arn"})),
        http_reply(200, &json!({"Plaintext": "%%%"})),
    ];
    for reply in replies {
        let t = Test::with_credentials(vec![aws_credentials()]);
        let mut ctx = decrypt_until_kms(&t, &sealed_command(), &[aws_key_document(1)]);
        for request in ctx.kms_requests().unwrap() {
            assert!(request.feed(&Buffer::wrap(&reply)).is_err());
            assert_eq!(request.status().kind(), StatusKind::KmsError);
        }
        assert!(ctx.mark_kms_done().is_err());
        assert_failed(&ctx, StatusKind::KmsError);
    }
}

#[test]
fn test_wrong_length_data_key_is_fatal() {
    let t = Test::with_credentials(vec![aws_credentials()]);
    let mut ctx = decrypt_until_kms(&t, &sealed_command(), &[aws_key_document(1)]);
    answer_kms_unchecked(&mut ctx, aws_decrypt_reply(&[0x42; 16]));
    assert_state(&ctx, State::Error);
}

fn answer_kms_unchecked(ctx: &mut Context, reply: Vec<u8>) {
    for request in ctx.kms_requests().unwrap() {
        request.feed(&Buffer::wrap(&reply)).unwrap();
    }
    assert!(ctx.mark_kms_done().is_err());
}

#[test]
fn test_mark_kms_done_requires_every_reply() {
    let t = Test::with_credentials(vec![aws_credentials()]);
    let mut ctx = decrypt_until_kms(&t, &sealed_command(), &[aws_key_document(1)]);

    let err = ctx.mark_kms_done().unwrap_err();
    assert!(matches!(err, Error::Client(ClientError::KmsPending(1))));
    assert_state(&ctx, State::NeedKms);

    let reply = aws_decrypt_reply(&DATA_KEY);
    for request in ctx.kms_requests().unwrap() {
        request.feed(&Buffer::wrap(&reply[..10])).unwrap();
    }
    assert!(ctx.mark_kms_done().is_err());
    assert_state(&ctx, State::NeedKms);

    let err = ctx.kms_requests().unwrap_err();
    assert!(matches!(err, Error::Client(ClientError::KmsAlreadyEnumerated)));
}

#[test]
fn test_requests_may_be_listed_until_fed() {
    let t = Test::with_credentials(vec![aws_credentials()]);
    let mut ctx = decrypt_until_kms(&t, &sealed_command(), &[aws_key_document(1)]);
    let first: Vec<String> = ctx.kms_requests().unwrap().map(|r| r.endpoint().to_string()).collect();
    let second: Vec<String> = ctx.kms_requests().unwrap().map(|r| r.endpoint().to_string()).collect();
    assert_eq!(first, second);
}

#[test]
fn test_missing_provider_credentials() {
    let t = Test::new();
    let mut ctx = t.client.decrypt_context(&Buffer::wrap(&sealed_command()));
    feed_phase(&mut ctx, State::NeedMongoCollinfo, &[]);
    ctx.get_operation().unwrap();
    ctx.feed(&Buffer::wrap(&aws_key_document(1))).unwrap();
    let err = ctx.mark_done().unwrap_err();
    assert!(matches!(err, Error::Client(ClientError::MissingCredentials(_))));
    assert_failed(&ctx, StatusKind::ClientError);
}

#[test]
fn test_azure_token_then_unwrap() {
    let t = Test::with_credentials(vec![azure_credentials()]);
    let mut ctx = decrypt_until_kms(&t, &sealed_command(), &[azure_key_document(1)]);

    {
        let requests: Vec<_> = ctx.kms_requests().unwrap().collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind(), KmsRequestKind::AzureOauth);
        assert_eq!(requests[0].endpoint(), "login.microsoftonline.com:443");
        assert_eq!(requests[0].key_id(), None);
        let text = message(&requests[0]);
        assert!(text.starts_with("POST /tenant-1/oauth2/v2.0/token HTTP/1.1\r\n"));
        assert!(text.contains("client_secret=azure-secret"));
        assert!(text.contains("grant_type=client_credentials"));
    }
    answer_kms(&mut ctx, |_| oauth_reply("azure-token"));

    assert_state(&ctx, State::NeedKms);
    {
        let requests: Vec<_> = ctx.kms_requests().unwrap().collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind(), KmsRequestKind::AzureUnwrap);
        assert_eq!(requests[0].endpoint(), "example.vault.azure.net:443");
        let text = message(&requests[0]);
        assert!(text.starts_with("POST /keys/key-name/unwrapkey?api-version=7.1 HTTP/1.1\r\n"));
        assert!(text.contains("Authorization: Bearer azure-token\r\n"));
        assert!(text.contains("RSA-OAEP-256"));
    }
    answer_kms(&mut ctx, |_| azure_unwrap_reply(&DATA_KEY));

    let out = finish(&mut ctx);
    assert_eq!(out["filter"]["ssn"], "457-55-5462");
}

#[test]
fn test_gcp_token_then_decrypt() {
    let t = Test::with_credentials(vec![gcp_credentials()]);
    let mut ctx = decrypt_until_kms(&t, &sealed_command(), &[gcp_key_document(1)]);

    {
        let requests: Vec<_> = ctx.kms_requests().unwrap().collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind(), KmsRequestKind::GcpOauth);
        assert_eq!(requests[0].endpoint(), "oauth2.googleapis.com:443");
        let text = message(&requests[0]);
        assert!(text.starts_with("POST /token HTTP/1.1\r\n"));
        assert!(text.contains("assertion="));
    }
    assert_eq!(t.hooks.signatures(), 1);
    answer_kms(&mut ctx, |_| oauth_reply("gcp-token"));

    {
        let requests: Vec<_> = ctx.kms_requests().unwrap().collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind(), KmsRequestKind::GcpDecrypt);
        assert_eq!(requests[0].endpoint(), "cloudkms.googleapis.com:443");
        let text = message(&requests[0]);
        assert!(text.contains("/v1/projects/proj/locations/global/keyRings/ring/cryptoKeys/key:decrypt"));
        assert!(text.contains("Authorization: Bearer gcp-token\r\n"));
    }
    answer_kms(&mut ctx, |_| gcp_decrypt_reply(&DATA_KEY));

    let out = finish(&mut ctx);
    assert_eq!(out["filter"]["ssn"], "457-55-5462");
}

#[test]
fn test_signing_failure_is_client_error() {
    let t = Test::with_credentials(vec![gcp_credentials()]);
    let mut ctx = t.client.decrypt_context(&Buffer::wrap(&sealed_command()));
    feed_phase(&mut ctx, State::NeedMongoCollinfo, &[]);
    ctx.get_operation().unwrap();
    ctx.feed(&Buffer::wrap(&gcp_key_document(1))).unwrap();

    t.hooks.fail("sign_rsaes_pkcs1_v1_5");
    assert!(ctx.mark_done().is_err());
    assert_failed(&ctx, StatusKind::ClientError);
}

#[test]
fn test_mixed_providers_share_rounds() {
    let t = Test::with_credentials(vec![aws_credentials(), azure_credentials()]);
    let mut ctx = decrypt_until_kms(
        &t,
        &sealed_two_keys(),
        &[aws_key_document(1), azure_key_document(2)],
    );

    let mut kinds: Vec<KmsRequestKind> = ctx.kms_requests().unwrap().map(|r| r.kind()).collect();
    kinds.sort_by_key(|k| k.to_string());
    assert_eq!(kinds, vec![KmsRequestKind::AwsDecrypt, KmsRequestKind::AzureOauth]);

    answer_kms(&mut ctx, |request| match request.kind() {
        KmsRequestKind::AwsDecrypt => aws_decrypt_reply(&DATA_KEY),
        _ => oauth_reply("azure-token"),
    });

    let kinds: Vec<KmsRequestKind> = ctx.kms_requests().unwrap().map(|r| r.kind()).collect();
    assert_eq!(kinds, vec![KmsRequestKind::AzureUnwrap]);
    answer_kms(&mut ctx, |_| azure_unwrap_reply(&DATA_KEY));

    let out = finish(&mut ctx);
    assert_eq!(out["documents"][0]["a"], "first");
    assert_eq!(out["documents"][0]["b"], "second");
}

#[test]
fn test_local_keys_need_no_kms() {
    let t = Test::new();
    let mut ctx = t.client.decrypt_context(&Buffer::wrap(&sealed_command()));
    feed_phase(&mut ctx, State::NeedMongoCollinfo, &[]);
    feed_phase(
        &mut ctx,
        State::NeedMongoKeys,
        &[local_key_document(t.hooks.as_ref(), 1, &DATA_KEY)],
    );
    assert_state(&ctx, State::Ready);
    assert!(ctx.kms_requests().is_err());
}
