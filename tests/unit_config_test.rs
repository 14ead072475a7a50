use opaldb::config::Config;

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.bind, "127.0.0.1");
    assert_eq!(config.port, 6379);
    assert!(!config.append_only);
    assert_eq!(config.database_count, 16);
    assert_eq!(config.repl_timeout_secs, 60);
    assert!(!config.cluster_enabled());
}

#[test]
fn test_parse_recognized_keys() {
    let text = "\
# server basics
bind 0.0.0.0
port 7000
appendonly yes
appendfilename my.aof
maxclients 128
requirepass hunter2
databasecount 4
dbfilename dump.opdb
masterauth upstream-pw
slave-announce-port 7001
slave-announce-ip 10.0.0.9
repl-timeout 30
peers 10.0.0.1:7000,10.0.0.2:7000
self 10.0.0.3:7000
";
    let config = Config::parse(text);
    assert_eq!(config.bind, "0.0.0.0");
    assert_eq!(config.port, 7000);
    assert!(config.append_only);
    assert_eq!(config.append_filename, "my.aof");
    assert_eq!(config.max_clients, 128);
    assert_eq!(config.require_pass, "hunter2");
    assert_eq!(config.database_count, 4);
    assert_eq!(config.db_filename, "dump.opdb");
    assert_eq!(config.master_auth, "upstream-pw");
    assert_eq!(config.slave_announce_port, 7001);
    assert_eq!(config.slave_announce_ip, "10.0.0.9");
    assert_eq!(config.repl_timeout_secs, 30);
    assert_eq!(config.peers, vec!["10.0.0.1:7000", "10.0.0.2:7000"]);
    assert_eq!(config.self_addr, "10.0.0.3:7000");
    assert!(config.cluster_enabled());
}

#[test]
fn test_comments_and_unknown_keys_are_ignored() {
    let text = "\
# comment line
port 6400
unknown-key whatever
appendonly no
";
    let config = Config::parse(text);
    assert_eq!(config.port, 6400);
    assert!(!config.append_only);
}

#[test]
fn test_keys_are_case_insensitive() {
    let config = Config::parse("PORT 6401\nAppendOnly yes\n");
    assert_eq!(config.port, 6401);
    assert!(config.append_only);
}

#[test]
fn test_zero_database_count_falls_back_to_default() {
    let config = Config::parse("databasecount 0\n");
    assert_eq!(config.database_count, 16);
}

#[test]
fn test_missing_file_is_an_error() {
    assert!(Config::from_file("/definitely/not/here.conf").is_err());
}
