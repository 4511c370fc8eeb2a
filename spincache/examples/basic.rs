use fibre_spincache::{CacheBuilder, TimeTicker};
use std::thread;
use std::time::Duration;

fn main() {
  // Keep the clock fresh even though this program mostly reads.
  let ticker = TimeTicker::spawn(TimeTicker::DEFAULT_INTERVAL).expect("Failed to start ticker");

  let cache = CacheBuilder::default()
    .capacity(1_000)
    .default_ttl(Duration::from_secs(60))
    .build()
    .expect("Failed to build cache");

  cache.insert(b"greeting", b"hello").expect("insert failed");
  cache
    .insert_with_ttl(b"session", b"short-lived", Duration::from_secs(1))
    .expect("insert failed");

  // The borrow points straight at the cached bytes.
  let greeting = cache.get(b"greeting").expect("greeting is cached");
  println!("greeting = {}", String::from_utf8_lossy(&greeting));

  // Replacing the key does not disturb the borrow we already hold.
  cache.insert(b"greeting", b"bonjour").expect("insert failed");
  println!("held borrow still reads {}", String::from_utf8_lossy(&greeting));
  println!(
    "fresh lookup reads {}",
    String::from_utf8_lossy(&cache.get(b"greeting").expect("greeting is cached"))
  );

  println!("\nWaiting for the session to expire...");
  thread::sleep(Duration::from_millis(2_200));
  match cache.get(b"session") {
    Some(_) => println!("session still cached"),
    None => println!("session expired"),
  }

  println!("\nCache metrics: {:#?}", cache.metrics());
  ticker.stop();
}
