mod common;

use common::TestDrive;
use matter_drive::services::backend::content_location;

#[tokio::test]
async fn register_twice_counts_two_and_keeps_first_location() {
    let drive = TestDrive::new().await;
    let dedup = drive.service.dedup();

    let first = dedup
        .register_or_increment("abcd", &content_location("abcd"), 5, "md5-a")
        .await
        .unwrap();
    assert_eq!(first.ref_count, 1);

    let second = dedup
        .register_or_increment("abcd", "elsewhere/abcd", 99, "md5-b")
        .await
        .unwrap();
    assert_eq!(second.ref_count, 2);
    assert_eq!(second.location, "ab/cd/abcd");
    assert_eq!(second.size_bytes, 5);
    assert_eq!(second.md5, "md5-a");
}

#[tokio::test]
async fn decrement_below_zero_is_an_invariant_violation() {
    let drive = TestDrive::new().await;
    let dedup = drive.service.dedup();
    dedup
        .register_or_increment("ffff", &content_location("ffff"), 1, "m")
        .await
        .unwrap();

    assert_eq!(dedup.decrement("ffff").await.unwrap().ref_count, 0);
    let zero = dedup.list_zero_referenced(10).await.unwrap();
    assert_eq!(zero.len(), 1);
    assert_eq!(zero[0].hash, "ffff");

    let err = dedup.decrement("ffff").await.unwrap_err();
    assert!(err.is_invariant_violation());
    let err = dedup.decrement("0000").await.unwrap_err();
    assert!(err.is_invariant_violation());

    // The failed decrements changed nothing.
    let record = dedup.resolve("ffff").await.unwrap().unwrap();
    assert_eq!(record.ref_count, 0);
}
